use csv::ByteRecord;
use serde_json::Value;
use thiserror::Error;

use crate::store::Record;

/// Positional columns of a datapoint row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Id = 0,
    EsrsArea = 1,
    DisclosureRequirement = 2,
    Paragraph = 3,
    RelatedAr = 4,
    Name = 5,
    DataType = 6,
    ConditionalOrAlternative = 7,
    MayVoluntary = 8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("column {column} is not valid UTF-8")]
    InvalidUtf8 { column: usize },
}

/// The first twelve cells of a record, decoded. Missing trailing cells read as
/// empty; cells past the twelfth are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRow {
    cells: Vec<String>,
}

impl SourceRow {
    /// Columns 9 to 11 hold the appendix B/C markers; they are decoded with
    /// the row but not stored.
    pub const WIDTH: usize = 12;

    pub fn decode(record: &ByteRecord) -> Result<Self, RowError> {
        let mut cells = Vec::with_capacity(Self::WIDTH);
        for column in 0..Self::WIDTH {
            let raw = record.get(column).unwrap_or_default();
            let cell = std::str::from_utf8(raw).map_err(|_| RowError::InvalidUtf8 { column })?;
            cells.push(cell.to_string());
        }
        Ok(Self { cells })
    }

    /// Trimmed cell content.
    pub fn cell(&self, column: Column) -> &str {
        self.cells[column as usize].trim()
    }

    /// Trimmed cell content, `None` when blank.
    pub fn text(&self, column: Column) -> Option<&str> {
        Some(self.cell(column)).filter(|value| !value.is_empty())
    }

    pub fn is_voluntary(&self) -> bool {
        parse_voluntary_marker(self.cell(Column::MayVoluntary))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Narrative,
    Percentage,
    Date,
    Monetary,
    Numeric,
    Integer,
    Boolean,
}

/// Raw type patterns in priority order: the first pattern contained in the
/// lower-cased raw value decides. Reordering changes results (for example
/// `"monetary, at date"` resolves to `date`).
pub const DATA_TYPE_PATTERNS: &[(&str, DataType)] = &[
    ("narrative", DataType::Narrative),
    ("semi-narrative", DataType::Narrative),
    ("text", DataType::Narrative),
    ("percentage", DataType::Percentage),
    ("percent", DataType::Percentage),
    ("%", DataType::Percentage),
    ("date", DataType::Date),
    ("monetary", DataType::Monetary),
    ("currency", DataType::Monetary),
    ("number", DataType::Numeric),
    ("numeric", DataType::Numeric),
    ("integer", DataType::Integer),
    ("boolean", DataType::Boolean),
    ("yes/no", DataType::Boolean),
];

impl DataType {
    pub fn from_raw(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        if lowered.is_empty() {
            return Self::Narrative;
        }

        DATA_TYPE_PATTERNS
            .iter()
            .find(|(pattern, _)| lowered.contains(pattern))
            .map(|(_, data_type)| *data_type)
            .unwrap_or(Self::Narrative)
    }

    pub fn answer_type(self) -> AnswerType {
        match self {
            Self::Narrative => AnswerType::Text,
            Self::Percentage | Self::Monetary | Self::Numeric | Self::Integer => AnswerType::Number,
            Self::Date => AnswerType::Date,
            Self::Boolean => AnswerType::Boolean,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Narrative => "narrative",
            Self::Percentage => "percentage",
            Self::Date => "date",
            Self::Monetary => "monetary",
            Self::Numeric => "numeric",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerType {
    Text,
    Number,
    Date,
    Boolean,
}

impl AnswerType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Date => "date",
            Self::Boolean => "boolean",
        }
    }
}

const TRUE_TOKENS: &[&str] = &["yes", "true", "1", "y", "mandatory", "x", "conditional"];

/// Flag cells use several spellings; anything outside [`TRUE_TOKENS`] is false.
pub fn parse_flag(value: &str) -> bool {
    let lowered = value.trim().to_lowercase();
    TRUE_TOKENS.contains(&lowered.as_str())
}

/// The `May [V]` column marks voluntary datapoints with `V` or a flag token.
pub fn parse_voluntary_marker(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("v") || parse_flag(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RejectReason {
    MissingIdentifier,
    MissingQuestionText,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingIdentifier => "missing_identifier",
            Self::MissingQuestionText => "missing_question_text",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Accepted(QuestionDraft),
    Rejected(RejectReason),
    Failed(RowError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionDraft {
    pub topic_id: String,
    pub version_id: String,
    pub code: String,
    pub question_text: String,
    pub data_type: DataType,
    pub answer_type: AnswerType,
    pub is_mandatory: bool,
    pub is_conditional: bool,
    pub disclosure_requirement: Option<String>,
    pub esrs_paragraph: Option<String>,
    pub esrs_section: Option<String>,
    pub related_ar: Option<String>,
    pub valid_from: String,
}

const OPTIONAL_QUESTION_COLUMNS: &[&str] = &[
    "disclosure_requirement",
    "esrs_paragraph",
    "esrs_section",
    "related_ar",
    "is_conditional",
];

impl QuestionDraft {
    /// Store record; absent optional fields are left out rather than nulled.
    pub fn to_record(&self) -> Record {
        let mut record = crate::record! {
            "topic_id" => self.topic_id.as_str(),
            "version_id" => self.version_id.as_str(),
            "code" => self.code.as_str(),
            "datapoint_id" => self.code.as_str(),
            "question_text" => self.question_text.as_str(),
            "answer_type" => self.answer_type.as_str(),
            "data_type" => self.data_type.as_str(),
            "is_mandatory" => self.is_mandatory,
            "valid_from" => self.valid_from.as_str(),
        };

        let optional = [
            ("disclosure_requirement", &self.disclosure_requirement),
            ("esrs_paragraph", &self.esrs_paragraph),
            ("esrs_section", &self.esrs_section),
            ("related_ar", &self.related_ar),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                record.insert(key.to_string(), Value::from(value.as_str()));
            }
        }
        if self.is_conditional {
            record.insert("is_conditional".to_string(), Value::Bool(true));
        }

        record
    }

    /// Record for an upsert: every optional column is present, nulled when
    /// absent, so an existing row ends up as a fresh insert would write it.
    pub fn to_upsert_record(&self, updated_at: &str) -> Record {
        let mut record = self.to_record();
        for key in OPTIONAL_QUESTION_COLUMNS {
            record.entry(*key).or_insert(Value::Null);
        }
        record.insert("updated_at".to_string(), Value::from(updated_at));
        record
    }
}

/// Turns datapoint rows of one topic file into question drafts for a version.
#[derive(Debug, Clone)]
pub struct RowNormalizer {
    topic_id: String,
    version_id: String,
    valid_from: String,
}

impl RowNormalizer {
    pub fn new(topic_id: &str, version_id: &str, valid_from: &str) -> Self {
        Self {
            topic_id: topic_id.to_string(),
            version_id: version_id.to_string(),
            valid_from: valid_from.to_string(),
        }
    }

    pub fn normalize(&self, record: &ByteRecord) -> RowOutcome {
        match SourceRow::decode(record) {
            Ok(row) => self.normalize_row(&row),
            Err(err) => RowOutcome::Failed(err),
        }
    }

    pub fn normalize_row(&self, row: &SourceRow) -> RowOutcome {
        let Some(code) = row.text(Column::Id) else {
            return RowOutcome::Rejected(RejectReason::MissingIdentifier);
        };
        let Some(question_text) = row.text(Column::Name) else {
            return RowOutcome::Rejected(RejectReason::MissingQuestionText);
        };

        let data_type = DataType::from_raw(row.cell(Column::DataType));
        let owned = |column| row.text(column).map(str::to_owned);

        RowOutcome::Accepted(QuestionDraft {
            topic_id: self.topic_id.clone(),
            version_id: self.version_id.clone(),
            code: code.to_string(),
            question_text: question_text.to_string(),
            data_type,
            answer_type: data_type.answer_type(),
            is_mandatory: !row.is_voluntary(),
            is_conditional: parse_flag(row.cell(Column::ConditionalOrAlternative)),
            disclosure_requirement: owned(Column::DisclosureRequirement),
            esrs_paragraph: owned(Column::Paragraph),
            esrs_section: owned(Column::EsrsArea),
            related_ar: owned(Column::RelatedAr),
            valid_from: self.valid_from.clone(),
        })
    }
}
