use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::instr::Instr;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("duplicate label: {0}")]
    DuplicateLabel(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// One line of script text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Line {
    /// `:name`
    Label(String),
    Instr(Instr),
    /// Text copied through untouched.
    Raw(String),
    Blank,
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::Label(name) => write!(f, ":{name}"),
            Line::Instr(instr) => write!(f, "{instr}"),
            Line::Raw(text) => write!(f, "{text}"),
            Line::Blank => Ok(()),
        }
    }
}

/// A complete generated script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub lines: Vec<Line>,
}

impl Script {
    pub fn new() -> Self {
        Script::default()
    }

    pub fn push(&mut self, instr: Instr) {
        self.lines.push(Line::Instr(instr));
    }

    pub fn label(&mut self, name: impl Into<String>) {
        self.lines.push(Line::Label(name.into()));
    }

    pub fn blank(&mut self) {
        self.lines.push(Line::Blank);
    }

    pub fn raw(&mut self, text: impl Into<String>) {
        self.lines.push(Line::Raw(text.into()));
    }

    pub fn instrs(&self) -> impl Iterator<Item = &Instr> {
        self.lines.iter().filter_map(|line| match line {
            Line::Instr(i) => Some(i),
            _ => None,
        })
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|line| match line {
            Line::Label(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Map every label to the index of its line. Fails on the first label
    /// defined twice.
    pub fn label_index(&self) -> Result<HashMap<&str, usize>, ScriptError> {
        let mut index = HashMap::new();
        for (i, line) in self.lines.iter().enumerate() {
            if let Line::Label(name) = line {
                if index.insert(name.as_str(), i).is_some() {
                    return Err(ScriptError::DuplicateLabel(name.clone()));
                }
            }
        }
        Ok(index)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, ScriptError> {
        serde_json::to_string_pretty(self).map_err(|e| ScriptError::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, ScriptError> {
        serde_json::from_str(json).map_err(|e| ScriptError::Serialization(e.to_string()))
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{line}")?;
        }
        Ok(())
    }
}
