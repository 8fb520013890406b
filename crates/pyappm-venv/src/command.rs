use std::fmt;
use std::process::{Command, Output};

use pyappm_core::{Error, Result};

/// A configured tool command line, split on whitespace.
///
/// Tool commands come from the manifest (`python3 -m venv`, `python3 -m pip`, ...).
/// No shell is involved, so quoting is not interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace().map(str::to_string);
        let Some(program) = words.next() else {
            return Err(Error::ToolCommand {
                command: line.to_string(),
                message: "command must not be empty".to_string(),
            });
        };

        Ok(Self {
            program,
            args: words.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

pub(crate) fn describe_command(command: &Command) -> String {
    let mut line = command.get_program().to_string_lossy().into_owned();
    for arg in command.get_args() {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

pub(crate) fn describe_output(output: &Output) -> String {
    format!(
        "status={} stdout='{}' stderr='{}'",
        output.status,
        String::from_utf8_lossy(&output.stdout).trim(),
        String::from_utf8_lossy(&output.stderr).trim()
    )
}
