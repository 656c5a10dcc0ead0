//! The rotation file: a timer line followed by role assignments and the
//! remaining team members.
//!
//! ```text
//! 4:12 / 5:00
//! Typing: Alice
//! Talking: Bob
//! Next: Charlie
//! Diana
//! Eva
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Roles handed out by `rotatectl init`, in order.
pub const DEFAULT_ROLES: [&str; 3] = ["Typing", "Talking", "Next"];

pub const DEFAULT_TEAM: [&str; 5] = ["Alice", "Bob", "Charlie", "Diana", "Eva"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("rotation file is empty")]
    Empty,

    #[error("invalid timer line: {0:?}")]
    InvalidTimer(String),

    #[error("invalid member name {0:?}: names must be a single line without ':'")]
    InvalidMember(String),
}

/// A non-negative span of whole seconds, written as `M:SS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span(u64);

impl Span {
    pub const ZERO: Span = Span(0);

    pub fn from_secs(secs: u64) -> Self {
        Span(secs)
    }

    /// Saturates at the largest span; use `parse` to reject oversized input.
    pub fn from_min_sec(minutes: u64, seconds: u64) -> Self {
        Span(minutes.saturating_mul(60).saturating_add(seconds))
    }

    pub fn as_secs(self) -> u64 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.0)
    }

    /// Rounds partial seconds up, so a span only reads `0:00` once it is
    /// really exhausted.
    pub fn from_duration_ceil(d: Duration) -> Self {
        let extra = u64::from(d.subsec_nanos() > 0);
        Span(d.as_secs().saturating_add(extra))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for Span {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidTimer(s.to_string());
        let (minutes, seconds) = s.trim().split_once(':').ok_or_else(invalid)?;
        if !is_digits(minutes) || !is_digits(seconds) {
            return Err(invalid());
        }
        let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
        let seconds: u64 = seconds.parse().map_err(|_| invalid())?;
        if seconds >= 60 {
            return Err(invalid());
        }
        minutes
            .checked_mul(60)
            .and_then(|secs| secs.checked_add(seconds))
            .map(Span)
            .ok_or_else(invalid)
    }
}

impl Serialize for Span {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Span {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s: String = Deserialize::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    pub remaining: Span,
    pub total: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub role: String,
    pub member: String,
}

impl Assignment {
    pub fn new(role: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            member: member.into(),
        }
    }
}

/// Everything persisted in one rotation file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationState {
    pub timer: TimerState,
    pub roles: Vec<Assignment>,
    pub tail: Vec<String>,
}

impl RotationState {
    /// Starting file for a new team: the first members take the default
    /// roles, everyone else waits in the tail.
    pub fn template<I>(members: I, span: Span) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut members: Vec<String> = members.into_iter().map(Into::into).collect();
        let tail = members.split_off(DEFAULT_ROLES.len().min(members.len()));
        let roles = DEFAULT_ROLES
            .iter()
            .zip(members)
            .map(|(role, member)| Assignment::new(*role, member))
            .collect();
        Self {
            timer: TimerState {
                remaining: span,
                total: span,
            },
            roles,
            tail,
        }
    }

    /// Checks that `name` survives a write/read cycle as a member name:
    /// one line, no surrounding whitespace and no `:` that would turn it
    /// into a role line.
    pub fn validate_member(name: &str) -> Result<(), ParseError> {
        let valid = !name.is_empty()
            && name.trim() == name
            && !name.contains(':')
            && !name.chars().any(char::is_control);
        if valid {
            Ok(())
        } else {
            Err(ParseError::InvalidMember(name.to_string()))
        }
    }

    pub fn with_remaining(&self, remaining: Span) -> Self {
        Self {
            timer: TimerState {
                remaining,
                total: self.timer.total,
            },
            ..self.clone()
        }
    }

    /// Role holders followed by the tail.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.roles
            .iter()
            .map(|a| a.member.as_str())
            .chain(self.tail.iter().map(String::as_str))
    }

    pub fn decode(text: &str) -> Result<Self, ParseError> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        let timer = parse_timer_line(lines.next().ok_or(ParseError::Empty)?)?;

        let mut roles = Vec::new();
        let mut tail = Vec::new();
        for line in lines {
            match parse_role_line(line) {
                Some(assignment) => roles.push(assignment),
                None => tail.push(line.to_string()),
            }
        }
        Ok(Self { timer, roles, tail })
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl FromStr for RotationState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl fmt::Display for RotationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} / {}", self.timer.remaining, self.timer.total)?;
        for a in &self.roles {
            writeln!(f, "{}: {}", a.role, a.member)?;
        }
        for member in &self.tail {
            writeln!(f, "{}", member)?;
        }
        Ok(())
    }
}

fn parse_timer_line(line: &str) -> Result<TimerState, ParseError> {
    let (remaining, total) = line
        .split_once('/')
        .ok_or_else(|| ParseError::InvalidTimer(line.to_string()))?;
    let remaining = remaining
        .parse()
        .map_err(|_| ParseError::InvalidTimer(line.to_string()))?;
    let total = total
        .parse()
        .map_err(|_| ParseError::InvalidTimer(line.to_string()))?;
    Ok(TimerState { remaining, total })
}

fn parse_role_line(line: &str) -> Option<Assignment> {
    let (role, member) = line.split_once(':')?;
    let member = member.trim();
    let is_token = !role.is_empty() && role.chars().all(|c| c.is_alphanumeric() || c == '_');
    if !is_token || member.is_empty() {
        return None;
    }
    Some(Assignment::new(role, member))
}
