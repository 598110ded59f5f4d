/// Fixed-capacity ring buffer. Once full, each push overwrites the oldest
/// slot and hands the evicted value back.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    capacity: usize,
    head: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            head: 0,
        }
    }

    pub fn push(&mut self, value: T) -> Option<T> {
        if self.slots.len() < self.capacity {
            self.slots.push(value);
            return None;
        }

        let evicted = std::mem::replace(&mut self.slots[self.head], value);
        self.head = (self.head + 1) % self.capacity;
        Some(evicted)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    /// Value pushed `n` pushes ago (`0` is the newest).
    pub fn back(&self, n: usize) -> Option<&T> {
        let len = self.slots.len();
        if n >= len {
            return None;
        }
        Some(&self.slots[(self.head + len - 1 - n) % len])
    }

    pub fn last(&self) -> Option<&T> {
        self.back(0)
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter())
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = 0;
    }
}

impl<T: Copy> RingBuffer<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().copied().collect()
    }
}

pub const HISTORY_CAPACITY: usize = 100;

/// Rolling per-cycle histories the engine keeps across analyses.
#[derive(Debug, Clone)]
pub struct AnalysisHistory {
    pub energy: RingBuffer<f32>,
    pub valence: RingBuffer<f32>,
    pub tempo: RingBuffer<f32>,
}

impl AnalysisHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            energy: RingBuffer::new(capacity),
            valence: RingBuffer::new(capacity),
            tempo: RingBuffer::new(capacity),
        }
    }

    pub fn record(&mut self, energy: f32, valence: f32, tempo: f32) {
        self.energy.push(energy);
        self.valence.push(valence);
        self.tempo.push(tempo);
    }
}

impl Default for AnalysisHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}
