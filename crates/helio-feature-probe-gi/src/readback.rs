/// Two-slot GPU→CPU feedback ring.
///
/// Data written during frame `f` goes into slot `f % 2` and can only be taken during frame
/// `f + 1`. Anything older is discarded, so a skipped frame never resurfaces stale results.
#[derive(Debug)]
pub struct ReadbackRing<T> {
    slots: [Option<(u64, T)>; 2],
}

impl<T> Default for ReadbackRing<T> {
    fn default() -> Self {
        Self { slots: [None, None] }
    }
}

impl<T> ReadbackRing<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&mut self, frame: u64, value: T) {
        self.slots[(frame % 2) as usize] = Some((frame, value));
    }

    /// Take what frame `frame - 1` submitted.
    pub fn take_previous(&mut self, frame: u64) -> Option<T> {
        let previous = frame.checked_sub(1)?;
        let slot = &mut self.slots[(previous % 2) as usize];
        match slot.take() {
            Some((written, value)) if written == previous => Some(value),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.slots = [None, None];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_is_readable_only_next_frame() {
        let mut ring = ReadbackRing::new();
        ring.submit(4, "offsets");
        assert_eq!(ring.take_previous(4), None);
        ring.submit(4, "offsets");
        assert_eq!(ring.take_previous(5), Some("offsets"));
        assert_eq!(ring.take_previous(5), None);
    }

    #[test]
    fn test_skipped_frame_drops_old_data() {
        let mut ring = ReadbackRing::new();
        ring.submit(2, 20);
        // frames 3 and 4 neither read nor write; slot 0 still holds frame 2
        assert_eq!(ring.take_previous(5), None);
        ring.submit(5, 50);
        assert_eq!(ring.take_previous(6), Some(50));
    }

    #[test]
    fn test_frame_zero_has_no_previous() {
        let mut ring: ReadbackRing<u32> = ReadbackRing::new();
        assert_eq!(ring.take_previous(0), None);
    }
}
