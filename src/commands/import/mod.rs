mod loader;
mod run;

#[cfg(test)]
pub(crate) use run::import_plan;
pub use run::run;
