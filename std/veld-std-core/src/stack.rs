//!
//! Shadow Stack for Traceback Capture
//!
//! Binding trampolines push a frame on entry so that a failure deep
//! inside a native callback can still be reported with a useful
//! traceback. Frames are popped automatically when the returned
//! guard drops, so every exit path unwinds the shadow stack.
//!

use std::cell::RefCell;

/// A single frame in a captured traceback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function: String,
    pub file: &'static str,
    pub line: u32,
}

thread_local! {
    static FRAMES: RefCell<Vec<StackFrame>> = const { RefCell::new(Vec::new()) };
}

/// Pops the frame when dropped.
pub struct FrameGuard {
    _private: (),
}

/// Pushes a frame onto this thread's shadow stack.
pub fn push_frame(function: impl Into<String>, file: &'static str, line: u32) -> FrameGuard {
    FRAMES.with(|frames| {
        frames.borrow_mut().push(StackFrame {
            function: function.into(),
            file,
            line,
        });
    });
    FrameGuard { _private: () }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        FRAMES.with(|frames| {
            frames.borrow_mut().pop();
        });
    }
}

/// Captures the current shadow stack, most recent frame first.
pub fn capture() -> Vec<StackFrame> {
    FRAMES.with(|frames| frames.borrow().iter().rev().cloned().collect())
}

/// Current shadow stack depth.
pub fn depth() -> usize {
    FRAMES.with(|frames| frames.borrow().len())
}

/// Formats a captured traceback, one line per frame.
pub fn format_traceback(frames: &[StackFrame]) -> String {
    if frames.is_empty() {
        return String::from("  (no traceback)\n");
    }
    let mut out = String::new();
    for frame in frames {
        out.push_str(&format!(
            "  at {} ({}:{})\n",
            frame.function, frame.file, frame.line
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_nest_and_unwind() {
        assert_eq!(depth(), 0);
        {
            let _outer = push_frame("outer", file!(), line!());
            assert_eq!(depth(), 1);
            {
                let _inner = push_frame("inner", file!(), line!());
                let captured = capture();
                assert_eq!(captured.len(), 2);
                assert_eq!(captured[0].function, "inner");
                assert_eq!(captured[1].function, "outer");
            }
            assert_eq!(depth(), 1);
        }
        assert_eq!(depth(), 0);
    }

    #[test]
    fn test_format_traceback() {
        let frames = vec![StackFrame {
            function: "f".to_string(),
            file: "x.rs",
            line: 7,
        }];
        assert_eq!(format_traceback(&frames), "  at f (x.rs:7)\n");
        assert!(format_traceback(&[]).contains("no traceback"));
    }
}
