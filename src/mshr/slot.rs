use crate::timeq::Cycle;

/// One merged sub-request inside an MSHR entry.
///
/// `requester` is a notification handle owned elsewhere; prefetch fills carry none.
#[derive(Debug, Clone, Copy)]
pub struct BlockSlot<R> {
    offset: u64,
    requester: Option<R>,
    request_time: Cycle,
    valid: bool,
}

impl<R: Copy> BlockSlot<R> {
    pub(crate) fn empty() -> Self {
        Self {
            offset: 0,
            requester: None,
            request_time: 0,
            valid: false,
        }
    }

    pub(crate) fn fill(&mut self, offset: u64, requester: Option<R>, now: Cycle) {
        self.offset = offset;
        self.requester = requester;
        self.request_time = now;
        self.valid = true;
    }

    pub(crate) fn clear(&mut self) {
        self.requester = None;
        self.valid = false;
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn requester(&self) -> Option<R> {
        self.requester
    }

    pub fn request_time(&self) -> Cycle {
        self.request_time
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}
