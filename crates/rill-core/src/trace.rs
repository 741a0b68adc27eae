//! Aggregated call traces.
//!
//! A [`Trace`] is the rendered form of the job's execution stack at the
//! moment a failure was first observed. Frames are ordered root to leaf and
//! render one per line, indented by stack depth.

use std::fmt;

/// One active operation invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// Title of the operation.
    pub title: String,
    /// Type of the enclosing flow (`flow`, `block`), if any.
    pub flow_type: Option<String>,
    /// Name of the enclosing flow, if it has one.
    pub flow_name: Option<String>,
    /// 0-based index of the step within the enclosing flow.
    pub step_index: Option<usize>,
    /// Human label for a step of the enclosing flow (`step`, `op`).
    pub step_label: String,
}

impl TraceFrame {
    /// Describes where in its enclosing flow this frame ran.
    ///
    /// Step numbers are rendered 1-based.
    pub fn location(&self) -> Option<String> {
        let flow_type = self.flow_type.as_deref()?;
        let mut location = match &self.flow_name {
            Some(name) => format!("{flow_type} \"{name}\""),
            None => flow_type.to_owned(),
        };
        if let Some(index) = self.step_index {
            location.push_str(&format!(", {} {}", self.step_label, index + 1));
        }
        Some(location)
    }
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location() {
            Some(location) => write!(f, "{} ({location})", self.title),
            None => f.write_str(&self.title),
        }
    }
}

/// Root-to-leaf sequence of frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trace {
    frames: Vec<TraceFrame>,
}

impl Trace {
    /// Creates a trace from frames ordered root to leaf.
    pub fn new(frames: Vec<TraceFrame>) -> Self {
        Self { frames }
    }

    /// Returns the frames, root first.
    pub fn frames(&self) -> &[TraceFrame] {
        &self.frames
    }

    /// Returns the innermost frame.
    pub fn leaf(&self) -> Option<&TraceFrame> {
        self.frames.last()
    }

    /// Returns the number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if the trace has no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (depth, frame) in self.frames.iter().enumerate() {
            if depth > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{:indent$}{frame}", "", indent = depth * 2)?;
        }
        Ok(())
    }
}
