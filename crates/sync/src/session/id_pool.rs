use super::SessionError;

const WORDS: usize = (u16::MAX as usize + 1) / 64;
/// `0xFFFF` is never handed out.
const ID_COUNT: u32 = u16::MAX as u32;

/// Allocator for the 16-bit network ids one peer assigns to the entities it
/// replicates. Scans forward from the last id handed out, so a freed id is
/// not reused until the scan wraps around to it.
#[derive(Debug, Clone)]
pub struct NetworkIdPool {
    used: Vec<u64>,
    next: u16,
    count: usize,
}

impl Default for NetworkIdPool {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkIdPool {
    pub fn new() -> Self {
        Self {
            used: vec![0; WORDS],
            next: 0,
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_allocated(&self, id: u16) -> bool {
        self.used[id as usize / 64] & (1 << (id % 64)) != 0
    }

    pub fn allocate(&mut self) -> Result<u16, SessionError> {
        for offset in 0..ID_COUNT {
            let id = ((self.next as u32 + offset) % ID_COUNT) as u16;
            if !self.is_allocated(id) {
                self.used[id as usize / 64] |= 1 << (id % 64);
                self.count += 1;
                self.next = ((id as u32 + 1) % ID_COUNT) as u16;
                return Ok(id);
            }
        }
        Err(SessionError::NetworkIdsExhausted)
    }

    pub fn release(&mut self, id: u16) -> bool {
        if !self.is_allocated(id) {
            return false;
        }
        self.used[id as usize / 64] &= !(1 << (id % 64));
        self.count -= 1;
        true
    }
}
