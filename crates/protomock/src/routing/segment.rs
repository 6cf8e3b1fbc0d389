use std::fmt;

/// Directory-name prefix marking a dynamic (parameter) segment.
pub const PARAM_PREFIX: &str = "__";

/// One component of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Matches exactly this literal.
    Static(String),
    /// Matches any single segment and binds it under this name.
    Param(String),
}

impl Segment {
    /// Classify a directory name. Returns `None` for a malformed dynamic
    /// segment (`__` alone, or a name with characters other than ASCII
    /// letters, digits and `_`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.strip_prefix(PARAM_PREFIX) {
            None => Some(Segment::Static(raw.to_string())),
            Some(name) if is_param_name(name) => Some(Segment::Param(name.to_string())),
            Some(_) => None,
        }
    }

    pub fn is_param(&self) -> bool {
        matches!(self, Segment::Param(_))
    }
}

fn is_param_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Static(literal) => f.write_str(literal),
            Segment::Param(name) => write!(f, ":{name}"),
        }
    }
}

/// Render segments as a path pattern, e.g. `/users/:user_id`.
pub fn pattern(segments: &[Segment]) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }
    segments.iter().map(|s| format!("/{s}")).collect()
}
