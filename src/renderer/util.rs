use crate::renderer::error::RenderError;

/// Rounds `size` up to the next multiple of `alignment`, which must be a power of two.
pub fn align_up(size: u64, alignment: u64) -> Result<u64, RenderError> {
    if !alignment.is_power_of_two() {
        return Err(RenderError::ResourceCreationFailed {
            kind: "aligned allocation",
            reason: format!("alignment {alignment} is not a power of two"),
        });
    }
    Ok((size + alignment - 1) & !(alignment - 1))
}

/// Round-robin position over a fixed number of slots.
///
/// The cursor starts on the last slot so that the first call to [`RingCursor::advance`]
/// lands on slot 0.
#[derive(Debug, Clone)]
pub struct RingCursor {
    len: usize,
    index: usize,
}

impl RingCursor {
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "ring must have at least one slot");
        Self {
            len,
            index: len - 1,
        }
    }

    pub fn advance(&mut self) -> usize {
        self.index = (self.index + 1) % self.len;
        self.index
    }

    pub fn current(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_power_of_two() {
        assert_eq!(align_up(0, 256).unwrap(), 0);
        assert_eq!(align_up(1, 256).unwrap(), 256);
        assert_eq!(align_up(256, 256).unwrap(), 256);
        assert_eq!(align_up(257, 64).unwrap(), 320);
        assert_eq!(align_up(144, 1).unwrap(), 144);
    }

    #[test]
    fn align_up_rejects_non_power_of_two() {
        let err = align_up(100, 48).unwrap_err();
        assert!(matches!(err, RenderError::ResourceCreationFailed { .. }));
        assert!(align_up(100, 0).is_err());
    }

    #[test]
    fn ring_cursor_wraps() {
        let mut cursor = RingCursor::new(3);
        let visited: Vec<usize> = (0..7).map(|_| cursor.advance()).collect();
        assert_eq!(visited, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(cursor.current(), 0);
        assert_eq!(cursor.len(), 3);
    }
}
