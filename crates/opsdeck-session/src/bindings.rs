use std::borrow::Cow;

/// How a bound event's payload becomes an overlay line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderRule {
    /// `[meta] <payload>`
    Meta,
    /// The payload as is.
    Verbatim,
    /// `[ERR] <payload>`
    Error,
}

impl RenderRule {
    pub fn render<'a>(&self, payload: &'a str) -> Cow<'a, str> {
        match self {
            Self::Meta => Cow::Owned(format!("[meta] {payload}")),
            Self::Verbatim => Cow::Borrowed(payload),
            Self::Error => Cow::Owned(format!("[ERR] {payload}")),
        }
    }
}

/// Event name → render rule table for one call site. The terminal `end`
/// event is handled by the session itself and never appears here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventBindings {
    rules: Vec<(String, RenderRule)>,
}

impl EventBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the rule for `name`.
    pub fn bind(mut self, name: &str, rule: RenderRule) -> Self {
        match self.rules.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = rule,
            None => self.rules.push((name.to_string(), rule)),
        }
        self
    }

    pub fn rule_for(&self, name: &str) -> Option<RenderRule> {
        self.rules
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, rule)| *rule)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
