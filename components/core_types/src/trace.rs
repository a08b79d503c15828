//! Stack trace entries for guest exceptions.

use std::fmt;

/// One frame of a guest stack trace.
///
/// # Examples
///
/// ```
/// use core_types::StackFrame;
///
/// let frame = StackFrame {
///     class_name: "app/Main".to_string(),
///     method_name: "run".to_string(),
///     descriptor: "()V".to_string(),
///     offset: 14,
///     line: Some(27),
/// };
///
/// assert_eq!(frame.to_string(), "at app/Main.run()V (offset 14, line 27)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Internal name of the declaring class
    pub class_name: String,
    /// Method name
    pub method_name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Byte offset of the executing instruction
    pub offset: u32,
    /// Source line, when the method carries a line number table
    pub line: Option<u16>,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "at {}.{}{} (offset {}",
            self.class_name, self.method_name, self.descriptor, self.offset
        )?;
        if let Some(line) = self.line {
            write!(f, ", line {}", line)?;
        }
        write!(f, ")")
    }
}
