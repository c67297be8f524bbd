use core::time::Duration;

/// A mutable binding between a declaration and the caller's variable.
pub(crate) enum Target<'a> {
    Str(&'a mut String),
    Int(&'a mut i64),
    Float(&'a mut f64),
    Bool(&'a mut bool),
    Duration(&'a mut Duration),
}

impl Target<'_> {
    pub(crate) const fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Bool(_) => "boolean",
            Self::Duration(_) => "duration",
        }
    }

    pub(crate) const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    /// Renders the current value, used as the default in the usage listing.
    pub(crate) fn render(&self) -> String {
        match self {
            Self::Str(v) => (**v).clone(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Bool(v) => v.to_string(),
            Self::Duration(v) => humantime::format_duration(**v).to_string(),
        }
    }

    /// Parses `raw` and stores it. The target is untouched on error.
    pub(crate) fn assign(&mut self, raw: &str) -> Result<(), String> {
        match self {
            Self::Str(v) => **v = raw.to_owned(),
            Self::Int(v) => **v = raw.trim().parse().map_err(|e| format!("{e}"))?,
            Self::Float(v) => **v = raw.trim().parse().map_err(|e| format!("{e}"))?,
            Self::Bool(v) => **v = parse_bool(raw)?,
            Self::Duration(v) => **v = parse_duration(raw)?,
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim() {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        other => Err(format!("{other:?} is not a boolean")),
    }
}

fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(raw).map_err(|e| format!("{e}"))
}
