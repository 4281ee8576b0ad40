use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a script-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Misuse at a call site: calling a non-callable, malformed arguments.
    UsageError,
    TypeError,
    ValueError,
    NameError,
    AttributeError,
    KeyError,
    IndexError,
    ZeroDivisionError,
    ImportError,
    /// An activity round trip came back with an error.
    ActivityError,
    /// A worker RPC answered with a non-empty error field.
    ProtocolError,
    /// Raised explicitly by user code.
    Exception,
    RuntimeError,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::UsageError => "UsageError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::NameError => "NameError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::ImportError => "ImportError",
            ErrorKind::ActivityError => "ActivityError",
            ErrorKind::ProtocolError => "ProtocolError",
            ErrorKind::Exception => "Exception",
            ErrorKind::RuntimeError => "RuntimeError",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name {
            "UsageError" => ErrorKind::UsageError,
            "TypeError" => ErrorKind::TypeError,
            "ValueError" => ErrorKind::ValueError,
            "NameError" => ErrorKind::NameError,
            "AttributeError" => ErrorKind::AttributeError,
            "KeyError" => ErrorKind::KeyError,
            "IndexError" => ErrorKind::IndexError,
            "ZeroDivisionError" => ErrorKind::ZeroDivisionError,
            "ImportError" => ErrorKind::ImportError,
            "ActivityError" => ErrorKind::ActivityError,
            "ProtocolError" => ErrorKind::ProtocolError,
            "Exception" => ErrorKind::Exception,
            "RuntimeError" => ErrorKind::RuntimeError,
            _ => return None,
        };
        Some(kind)
    }
}

/// One traceback entry, outermost frame first in [`ScriptError::traceback`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub file: String,
    pub line: u32,
    pub source: String,
    pub function: String,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  File \"{}\", line {}, in {}",
            self.file, self.line, self.function
        )?;
        if !self.source.is_empty() {
            write!(f, "\n    {}", self.source)?;
        }
        Ok(())
    }
}

/// Error raised inside workflow code.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub message: String,
    pub traceback: Vec<Frame>,
}

impl ScriptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            traceback: Vec::new(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UsageError, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValueError, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RuntimeError, message)
    }

    /// Record a frame the error is unwinding through. Frames are pushed
    /// innermost first, so each new one goes to the front.
    pub fn push_frame(&mut self, frame: Frame) {
        self.traceback.insert(0, frame);
    }

    /// Render in the familiar "Traceback ..." layout.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.traceback.is_empty() {
            out.push_str("Traceback (most recent call last):\n");
            for frame in &self.traceback {
                out.push_str(&frame.to_string());
                out.push('\n');
            }
        }
        out.push_str(&self.to_string());
        out
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)
    }
}

impl std::error::Error for ScriptError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_accumulate_outermost_first() {
        let mut err = ScriptError::value_error("bad");
        err.push_frame(Frame {
            file: "wf.flow".into(),
            line: 7,
            source: "fail()".into(),
            function: "inner".into(),
        });
        err.push_frame(Frame {
            file: "wf.flow".into(),
            line: 2,
            source: "inner()".into(),
            function: "outer".into(),
        });
        assert_eq!(err.traceback[0].function, "outer");
        let rendered = err.render();
        assert!(rendered.starts_with("Traceback (most recent call last):"));
        assert!(rendered.ends_with("ValueError: bad"));
    }
}
