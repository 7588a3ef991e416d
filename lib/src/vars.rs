use std::collections::BTreeMap;

use log::warn;
use once_cell::sync::OnceCell;
use regex::{Captures, Regex};
use serde::Serialize;

use crate::error::Result;

const VARIABLE: &str = r"\$\{([^}]+)\}|\$([A-Za-z_][A-Za-z0-9_.\-]*)";

static VARIABLE_PATTERN: OnceCell<Regex> = OnceCell::new();

/// Values captured from remote commands during one run, by variable name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct OutputBindings(BTreeMap<String, String>);

impl OutputBindings {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Binds `name`, replacing an earlier value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copies every binding into `properties`. Properties that already exist
    /// keep their value.
    pub fn publish_into(&self, properties: &mut BTreeMap<String, String>) {
        for (name, value) in &self.0 {
            match properties.get(name) {
                Some(existing) if existing != value => {
                    warn!("property '{}' already set to '{}', not overriding", name, existing)
                }
                Some(_) => {}
                None => {
                    properties.insert(name.clone(), value.clone());
                }
            }
        }
    }

    /// Replaces `${name}` and `$name` tokens with bound values.
    ///
    /// A bare `$name` token greedily swallows dots and dashes, so it is
    /// matched against the longest bound prefix and the rest is kept as text;
    /// `$host.` at the end of a sentence still resolves `host`. Tokens naming
    /// nothing bound are left untouched.
    pub fn substitute(&self, text: &str) -> Result<String> {
        let pattern = VARIABLE_PATTERN.get_or_try_init(|| Regex::new(VARIABLE))?;
        let replaced = pattern.replace_all(text, |caps: &Captures| {
            let token = &caps[0];
            if let Some(name) = caps.get(1) {
                return match self.get(name.as_str()) {
                    Some(value) => value.to_string(),
                    None => token.to_string(),
                };
            }

            let name = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            let mut end = name.len();
            while end > 0 {
                if name.is_char_boundary(end) {
                    if let Some(value) = self.get(&name[..end]) {
                        return format!("{}{}", value, &name[end..]);
                    }
                }
                end -= 1;
            }
            token.to_string()
        });
        Ok(replaced.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bindings(pairs: &[(&str, &str)]) -> OutputBindings {
        let mut bindings = OutputBindings::default();
        for (k, v) in pairs {
            bindings.insert(*k, *v);
        }
        bindings
    }

    #[test]
    fn both_token_forms() {
        let b = bindings(&[("prop.hostnames", "host1")]);
        assert_eq!(b.substitute("echo $prop.hostnames").unwrap(), "echo host1");
        assert_eq!(b.substitute("echo ${prop.hostnames}").unwrap(), "echo host1");
    }

    #[test]
    fn trailing_text_after_a_bare_token_is_kept() {
        let b = bindings(&[("host", "web-1")]);
        assert_eq!(
            b.substitute("ping -c1 $host. done; cat $host-log").unwrap(),
            "ping -c1 web-1. done; cat web-1-log"
        );
    }

    #[test]
    fn longest_bound_name_wins() {
        let b = bindings(&[("a", "short"), ("a.b", "long")]);
        assert_eq!(b.substitute("$a.b $a.c").unwrap(), "long short.c");
    }

    #[test]
    fn unbound_tokens_stay_verbatim() {
        let b = bindings(&[("x", "1")]);
        assert_eq!(
            b.substitute("echo $HOME ${y} $ 5$").unwrap(),
            "echo $HOME ${y} $ 5$"
        );
    }

    #[test]
    fn pattern_is_compiled_once_and_shared() {
        let first = bindings(&[("x", "1")]);
        let second = bindings(&[("x", "2")]);
        assert_eq!(first.substitute("$x").unwrap(), "1");
        let compiled = VARIABLE_PATTERN.get().unwrap() as *const Regex;

        assert_eq!(second.substitute("${x}").unwrap(), "2");
        assert_eq!(first.substitute("$x$x").unwrap(), "11");
        assert!(std::ptr::eq(compiled, VARIABLE_PATTERN.get().unwrap()));
    }

    #[test]
    fn publishing_never_overrides() {
        let b = bindings(&[("new", "1"), ("old", "2")]);
        let mut properties = BTreeMap::new();
        properties.insert("old".to_string(), "0".to_string());

        b.publish_into(&mut properties);
        assert_eq!(properties.get("new").map(String::as_str), Some("1"));
        assert_eq!(properties.get("old").map(String::as_str), Some("0"));
    }
}
