/// Text handed out when the buffer crosses its size threshold
#[derive(Debug, Clone, PartialEq)]
pub struct RotatedText {
    pub sequence: u64,
    pub text: String,
}

/// Append-only text export buffer, rotated by size rather than by line count.
#[derive(Debug)]
pub struct TextBuffer {
    buffer: String,
    threshold: usize,
    rotations: u64,
}

impl TextBuffer {
    pub fn new(threshold: usize) -> Self {
        Self {
            buffer: String::new(),
            threshold: threshold.max(1),
            rotations: 0,
        }
    }

    /// Appends a line. Once the buffer reaches the threshold its whole
    /// content is returned and the buffer starts over empty.
    pub fn push_line(&mut self, line: &str) -> Option<RotatedText> {
        self.buffer.push_str(line);
        if self.buffer.len() < self.threshold {
            return None;
        }

        self.rotations += 1;
        Some(RotatedText {
            sequence: self.rotations,
            text: std::mem::take(&mut self.buffer),
        })
    }

    pub fn contents(&self) -> &str {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
