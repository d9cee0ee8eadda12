use std::{env::VarError, sync::atomic::Ordering};

use anyhow::{Result, bail};
use kstring::KString;

use crate::warn::TRACE;

pub const TRACE_ENV_VAR: &str = "MARKUPWRITER_TRACE";

/// Per pass settings of a `MarkupWriter`.
#[derive(Debug, Clone, PartialEq)]
pub struct WriterOptions {
    /// Id of the section to regenerate; `None` renders everything.
    pub filter_section: Option<KString>,
    /// Prepended to section ids to build the element ids in the
    /// document, usually unique per template instance.
    pub id_prefix: KString,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            filter_section: None,
            id_prefix: KString::from_static(""),
        }
    }
}

impl WriterOptions {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn partial(section_id: &str) -> Self {
        WriterOptions {
            filter_section: Some(KString::from_ref(section_id)),
            ..Default::default()
        }
    }

    pub fn id_prefix(mut self, prefix: &str) -> Self {
        self.id_prefix = KString::from_ref(prefix);
        self
    }
}

/// Get an env var as a String; decoding failures are reported as
/// errors.
pub fn getenv(name: &str) -> Result<Option<String>> {
    match std::env::var(name) {
        Ok(s) => Ok(Some(s)),
        Err(e) => match e {
            VarError::NotPresent => Ok(None),
            VarError::NotUnicode(_) => bail!("{name:?} env var is not unicode"),
        }
    }
}

pub fn parse_flag(name: &str, val: &str) -> Result<bool> {
    match val.trim() {
        "" | "0" | "false" | "no" => Ok(false),
        "1" | "true" | "yes" => Ok(true),
        _ => bail!("invalid value {val:?} for {name}, expecting 0 or 1")
    }
}

/// Set the `trace!` switch from the `MARKUPWRITER_TRACE` env var, if
/// present. Returns the resulting setting.
pub fn trace_from_env() -> Result<bool> {
    if let Some(val) = getenv(TRACE_ENV_VAR)? {
        TRACE.store(parse_flag(TRACE_ENV_VAR, &val)?, Ordering::Relaxed);
    }
    Ok(TRACE.load(Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_parse_flag() -> Result<()> {
        assert!(parse_flag("X", "1")?);
        assert!(parse_flag("X", " yes")?);
        assert!(! parse_flag("X", "0")?);
        assert!(! parse_flag("X", "")?);
        assert!(parse_flag("X", "2").is_err());
        Ok(())
    }

    #[test]
    fn t_options() {
        let o = WriterOptions::partial("a").id_prefix("tpl1_");
        assert_eq!(o.filter_section.as_deref(), Some("a"));
        assert_eq!(o.id_prefix.as_str(), "tpl1_");
        assert_eq!(WriterOptions::full().filter_section, None);
    }
}
