/// Fixed-capacity circular buffer with explicit head and length.
///
/// Slots are allocated lazily up to `capacity` and then reused in place.
/// Pushing into a full buffer overwrites the oldest element and hands it back.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    head: usize,
    len: usize,
    capacity: usize,
}

impl<T: Copy> RingBuffer<T> {
    /// Creates an empty buffer. A zero capacity is bumped to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::new(),
            head: 0,
            len: 0,
            capacity,
        }
    }

    /// Appends at the tail, returning the evicted oldest element when full
    pub fn push(&mut self, value: T) -> Option<T> {
        if self.len == self.capacity {
            let evicted = std::mem::replace(&mut self.slots[self.head], value);
            self.head = (self.head + 1) % self.capacity;
            return Some(evicted);
        }

        let tail = (self.head + self.len) % self.capacity;
        if tail == self.slots.len() {
            self.slots.push(value);
        } else {
            self.slots[tail] = value;
        }
        self.len += 1;
        None
    }

    /// Removes and returns the oldest element
    pub fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.slots[self.head];
        self.head = (self.head + 1) % self.capacity;
        self.len -= 1;
        Some(value)
    }

    pub fn front(&self) -> Option<&T> {
        self.get(0)
    }

    pub fn back(&self) -> Option<&T> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    /// Element at logical position `index`, 0 being the oldest
    pub fn get(&self, index: usize) -> Option<&T> {
        (index < self.len).then(|| &self.slots[(self.head + index) % self.capacity])
    }

    /// Oldest to newest. Reverse it to scan back from the newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator + '_ {
        (0..self.len).map(move |i| &self.slots[(self.head + i) % self.capacity])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
        self.slots.clear();
    }
}
