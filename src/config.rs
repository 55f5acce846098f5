// This module holds the knobs that change what the generator emits without changing what the
// emitted code means: whether dense integer switches may be lowered to a jump table, how many
// cases and how dense the case values must be for that, and how many worker threads the
// parallel driver may use. Options are plain data with a Default; from_env() overlays the
// DYNCG_* environment variables so test harnesses and the dump tool can flip them without
// plumbing, and validate() rejects values the generator cannot honor.

//! Code generation options.

use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange { field: &'static str, value: u64, min: u64, max: u64 },

    #[error("environment variable {var} is not a number: {value:?}")]
    NotANumber { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenOptions {
    /// Allow `switch` over dense integer cases to use a jump table.
    pub emit_jump_tables: bool,

    /// Fewest cases worth a jump table (2..=1024).
    pub jump_table_min_cases: usize,

    /// Largest accepted ratio of the case value span to the case count
    /// (1..=64).
    pub jump_table_density: u64,

    /// Worker threads for [`crate::driver::compile_all`] (0=auto, 1..=256).
    pub num_workers: usize,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            emit_jump_tables: true,
            jump_table_min_cases: 3,
            jump_table_density: 2,
            num_workers: 0,
        }
    }
}

impl CodegenOptions {
    /// Defaults overlaid with `DYNCG_NO_JUMP_TABLES`,
    /// `DYNCG_JUMP_TABLE_MIN_CASES` and `DYNCG_WORKERS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut options = Self::default();
        if std::env::var_os("DYNCG_NO_JUMP_TABLES").is_some() {
            options.emit_jump_tables = false;
        }
        if let Some(value) = env_number("DYNCG_JUMP_TABLE_MIN_CASES")? {
            options.jump_table_min_cases = value as usize;
        }
        if let Some(value) = env_number("DYNCG_WORKERS")? {
            options.num_workers = value as usize;
        }
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("jump_table_min_cases", self.jump_table_min_cases as u64, 2, 1024)?;
        check_range("jump_table_density", self.jump_table_density, 1, 64)?;
        check_range("num_workers", self.num_workers as u64, 0, 256)?;
        Ok(())
    }
}

fn env_number(var: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::NotANumber { var, value }),
        Err(_) => Ok(None),
    }
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange { field, value, min, max });
    }
    Ok(())
}
