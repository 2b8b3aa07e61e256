//! Window title templates.
//!
//! `{{ .Command }}`, `{{ .Pid }}` and `{{ .Hostname }}` expand to details of
//! the running command. The leading dot and the whitespace inside the braces
//! are optional. Everything outside the braces is copied verbatim.

/// Errors from parsing a title format.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TitleError {
    #[error("unclosed action starting at byte {0}")]
    Unclosed(usize),
    #[error("empty action at byte {0}")]
    EmptyAction(usize),
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variable {
    Command,
    Pid,
    Hostname,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(Variable),
}

/// A parsed title format. Parsing checks every action, so rendering cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleTemplate {
    segments: Vec<Segment>,
}

/// Values substituted into a [`TitleTemplate`].
#[derive(Debug, Clone, Copy)]
pub struct TitleVars<'a> {
    /// Resolved path of the executable.
    pub command: &'a str,
    pub pid: u32,
    pub hostname: &'a str,
}

impl TitleTemplate {
    pub fn parse(format: &str) -> Result<Self, TitleError> {
        let mut segments = Vec::new();
        let mut offset = 0;

        while let Some(found) = format[offset..].find("{{") {
            let start = offset + found;
            if start > offset {
                segments.push(Segment::Literal(format[offset..start].to_string()));
            }

            let body = start + 2;
            let end = format[body..]
                .find("}}")
                .map(|i| body + i)
                .ok_or(TitleError::Unclosed(start))?;

            let action = format[body..end].trim();
            let name = action.strip_prefix('.').unwrap_or(action).trim();
            let variable = match name {
                "" => return Err(TitleError::EmptyAction(start)),
                "Command" => Variable::Command,
                "Pid" => Variable::Pid,
                "Hostname" => Variable::Hostname,
                other => return Err(TitleError::UnknownVariable(other.to_string())),
            };
            segments.push(Segment::Variable(variable));
            offset = end + 2;
        }

        if offset < format.len() {
            segments.push(Segment::Literal(format[offset..].to_string()));
        }

        Ok(Self { segments })
    }

    pub fn render(&self, vars: &TitleVars<'_>) -> String {
        let mut title = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => title.push_str(text),
                Segment::Variable(Variable::Command) => title.push_str(vars.command),
                Segment::Variable(Variable::Pid) => title.push_str(&vars.pid.to_string()),
                Segment::Variable(Variable::Hostname) => title.push_str(vars.hostname),
            }
        }
        title
    }
}
