//! The small textual wiring format produced by the model compiler.
//!
//! ```text
//! -> pin                                        plain input
//! => pin                                        reply-capable input
//! pin -> target @ node (uid)                    output, one target
//! pin => ["a @ n1 (u1)", "b @ n2 (u2)"]         output, several targets
//! selector: "a @ n1 (u1)" "b @ n2 (u2)"         filter scope
//! ```
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const PLAIN_ARROW: &str = "->";
pub const CHANNEL_ARROW: &str = "=>";

/// A declared input pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPin {
    pub pin: String,
    pub channel: bool,
}

impl InputPin {
    /// The literal declaration a cell may use as its handler key.
    pub fn declaration(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for InputPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", arrow(self.channel), self.pin)
    }
}

/// `targetPin @ targetNode (uid)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub pin: String,
    pub node: String,
    pub uid: String,
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {} ({})", self.pin, self.node, self.uid)
    }
}

/// A declared output pin with its statically wired targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPin {
    pub pin: String,
    pub channel: bool,
    pub targets: Vec<TargetSpec>,
}

impl fmt::Display for OutputPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.targets.as_slice() {
            [] => write!(f, "{} {}", self.pin, arrow(self.channel)),
            [single] => write!(f, "{} {} {}", self.pin, arrow(self.channel), single),
            many => {
                let quoted: Vec<String> = many.iter().map(|t| quote(&t.to_string())).collect();
                write!(f, "{} {} [{}]", self.pin, arrow(self.channel), quoted.join(", "))
            }
        }
    }
}

/// A filter scope: the selector a message arrives on and the targets the
/// filter may choose from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSpec {
    pub selector: String,
    pub targets: Vec<TargetSpec>,
}

impl fmt::Display for ScopeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.selector)?;
        for target in &self.targets {
            write!(f, " {}", quote(&target.to_string()))?;
        }
        Ok(())
    }
}

fn arrow(channel: bool) -> &'static str {
    if channel { CHANNEL_ARROW } else { PLAIN_ARROW }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Parses `-> pin` or `=> pin`.
pub fn parse_input(decl: &str) -> Option<InputPin> {
    let decl = decl.trim();
    let (channel, rest) = if let Some(rest) = decl.strip_prefix(CHANNEL_ARROW) {
        (true, rest)
    } else if let Some(rest) = decl.strip_prefix(PLAIN_ARROW) {
        (false, rest)
    } else {
        return None;
    };
    let pin = rest.trim();
    if pin.is_empty() {
        return None;
    }
    Some(InputPin {
        pin: pin.to_string(),
        channel,
    })
}

/// Parses an output declaration. An output without an arrow, or with
/// nothing after the arrow, is a declared but unconnected plain pin.
/// Targets that do not parse are skipped with a warning.
pub fn parse_output(decl: &str) -> Option<OutputPin> {
    let decl = decl.trim();
    let plain = decl.find(PLAIN_ARROW);
    let channel = decl.find(CHANNEL_ARROW);
    let (at, is_channel) = match (plain, channel) {
        (Some(p), Some(c)) if c < p => (c, true),
        (Some(p), _) => (p, false),
        (None, Some(c)) => (c, true),
        (None, None) => {
            if decl.is_empty() {
                return None;
            }
            return Some(OutputPin {
                pin: decl.to_string(),
                channel: false,
                targets: Vec::new(),
            });
        }
    };

    let pin = decl[..at].trim();
    if pin.is_empty() {
        return None;
    }
    let rest = decl[at + 2..].trim();

    let targets = if rest.is_empty() {
        Vec::new()
    } else if rest.starts_with('[') {
        quoted_strings(rest)
            .iter()
            .filter_map(|raw| {
                let target = parse_target(raw);
                if target.is_none() {
                    warn!("output `{pin}`: skipping malformed target `{raw}`");
                }
                target
            })
            .collect()
    } else {
        match parse_target(rest) {
            Some(target) => vec![target],
            None => {
                warn!("output `{pin}`: skipping malformed target `{rest}`");
                Vec::new()
            }
        }
    };

    Some(OutputPin {
        pin: pin.to_string(),
        channel: is_channel,
        targets,
    })
}

/// Parses `targetPin @ targetNode (uid)`. The uid is the balanced group
/// closing the string; nothing may follow it.
pub fn parse_target(raw: &str) -> Option<TargetSpec> {
    let raw = raw.trim();
    let close = raw.len().checked_sub(1).filter(|_| raw.ends_with(')'))?;
    let open = matching_open(raw, close)?;
    let uid = raw[open + 1..close].trim();
    let head = &raw[..open];
    let (pin, node) = head.split_once('@')?;
    let (pin, node) = (pin.trim(), node.trim());
    if pin.is_empty() || node.is_empty() || uid.is_empty() {
        return None;
    }
    Some(TargetSpec {
        pin: pin.to_string(),
        node: node.to_string(),
        uid: uid.to_string(),
    })
}

/// Byte offset of the `(` paired with the `)` at `close`.
fn matching_open(raw: &str, close: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, ch) in raw[..=close].char_indices().rev() {
        match ch {
            ')' => depth += 1,
            '(' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses `selector: "t1" "t2"`.
pub fn parse_scope(raw: &str) -> Option<ScopeSpec> {
    let (selector, rest) = raw.split_once(':')?;
    let selector = selector.trim();
    if selector.is_empty() {
        return None;
    }
    let targets = quoted_strings(rest)
        .iter()
        .filter_map(|t| {
            let target = parse_target(t);
            if target.is_none() {
                warn!("scope `{selector}`: skipping malformed target `{t}`");
            }
            target
        })
        .collect();
    Some(ScopeSpec {
        selector: selector.to_string(),
        targets,
    })
}

/// Every double-quoted group in `raw`, with `\"` and `\\` unescaped. An
/// unterminated trailing group is dropped.
pub fn quoted_strings(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '"' {
            continue;
        }
        let mut current = String::new();
        let mut closed = false;
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                }
                '"' => {
                    closed = true;
                    break;
                }
                other => current.push(other),
            }
        }
        if closed {
            out.push(current);
        }
    }
    out
}

/// Canonical handler name for a pin: `"node comment"` -> `"onNodeComment"`.
pub fn pin_to_handler(pin: &str) -> String {
    let mut name = String::from("on");
    for segment in pin.split([' ', '.', '-']) {
        let cleaned: String = segment
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        let mut chars = cleaned.chars();
        if let Some(first) = chars.next() {
            name.extend(first.to_uppercase());
            name.push_str(chars.as_str());
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inputs() {
        assert_eq!(
            parse_input("-> pong"),
            Some(InputPin { pin: "pong".into(), channel: false })
        );
        assert_eq!(
            parse_input("  =>  ask me "),
            Some(InputPin { pin: "ask me".into(), channel: true })
        );
        assert_eq!(parse_input("->   "), None);
        assert_eq!(parse_input("pong"), None);
    }

    #[test]
    fn parses_single_target_output() {
        let out = parse_output("ping -> pong @ Receiver (u-42)").unwrap();
        assert_eq!(out.pin, "ping");
        assert!(!out.channel);
        assert_eq!(
            out.targets,
            vec![TargetSpec { pin: "pong".into(), node: "Receiver".into(), uid: "u-42".into() }]
        );
    }

    #[test]
    fn single_target_output_round_trips() {
        let raw = "ask => answer @ Oracle (a1b2)";
        let parsed = parse_output(raw).unwrap();
        assert_eq!(parsed.to_string(), raw);
        assert_eq!(parse_output(&parsed.to_string()).unwrap(), parsed);
    }

    #[test]
    fn parses_multi_target_output() {
        let out = parse_output(r#"ask => ["a @ B (1)", "b @ C (2)", "broken"]"#).unwrap();
        assert!(out.channel);
        assert_eq!(out.targets.len(), 2);
        assert_eq!(out.targets[1].node, "C");
        assert_eq!(parse_output(&out.to_string()).unwrap(), out);
    }

    #[test]
    fn pin_names_may_contain_hyphens() {
        let out = parse_output("run-app -> start-it @ Shell (9)").unwrap();
        assert_eq!(out.pin, "run-app");
        assert_eq!(out.targets[0].pin, "start-it");
    }

    #[test]
    fn unconnected_outputs_have_no_targets() {
        assert!(parse_output("log").unwrap().targets.is_empty());
        assert!(parse_output("log ->").unwrap().targets.is_empty());
        assert!(parse_output("-> x @ y (z)").is_none());
    }

    #[test]
    fn target_needs_at_and_parens() {
        assert!(parse_target("pin node (uid)").is_none());
        assert!(parse_target("pin @ node uid").is_none());
        assert!(parse_target(" @ node (uid)").is_none());
        assert!(parse_target("pin @  (uid)").is_none());
        let t = parse_target("pin @ node (v2) (abc)").unwrap();
        assert_eq!(t.uid, "abc");
        assert_eq!(t.node, "node (v2)");
    }

    #[test]
    fn target_uid_is_the_balanced_trailing_group() {
        let t = parse_target("p @ n (a(b))").unwrap();
        assert_eq!(t.node, "n");
        assert_eq!(t.uid, "a(b)");
        assert!(parse_target("y @ n (u) -> z").is_none());
        assert!(parse_target("y @ n u)").is_none());
        assert!(parse_target("y @ n ()").is_none());
    }

    #[test]
    fn quoted_strings_tolerate_escapes() {
        let got = quoted_strings(r#"["a \"quoted\" @ n (1)", "b @ n (2)"]"#);
        assert_eq!(got, vec![r#"a "quoted" @ n (1)"#.to_string(), "b @ n (2)".to_string()]);
        assert_eq!(quoted_strings(r#""open"#), Vec::<String>::new());
    }

    #[test]
    fn parses_scope() {
        let scope = parse_scope(r#"route: "in @ X (x1)" "in @ Y (y1)""#).unwrap();
        assert_eq!(scope.selector, "route");
        assert_eq!(scope.targets.len(), 2);
        assert_eq!(parse_scope(&scope.to_string()).unwrap(), scope);
        assert!(parse_scope("no colon here").is_none());
    }

    #[test]
    fn pin_to_handler_camel_cases() {
        assert_eq!(pin_to_handler("node comment"), "onNodeComment");
        assert_eq!(pin_to_handler("run app in iframe"), "onRunAppInIframe");
        assert_eq!(pin_to_handler("file.save-as"), "onFileSaveAs");
        assert_eq!(pin_to_handler("  weird!! pin__x "), "onWeirdPin__x");
    }
}
