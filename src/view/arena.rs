//! Slot arena giving tracked entries stable handles.

/// Internal entry representation for arena slots.
#[derive(Debug, Clone)]
enum Entry<T> {
    /// Slot is free; stores the index of the next free slot in the freelist.
    Vacant(usize),
    /// Slot is occupied by a value.
    Occupied(T),
}

/// Vec-backed arena with a freelist. Indices stay valid until the value at
/// that index is removed.
#[derive(Debug, Clone)]
pub(crate) struct Arena<T> {
    entries: Vec<Entry<T>>,
    next_free: usize,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_free: 0,
            len: 0,
        }
    }
}

impl<T> Arena<T> {
    pub(crate) fn insert(&mut self, value: T) -> usize {
        let index = self.next_free;
        if index == self.entries.len() {
            self.entries.push(Entry::Occupied(value));
            self.next_free = self.entries.len();
        } else {
            let Entry::Vacant(next) = self.entries[index] else {
                unreachable!("freelist points at an occupied slot");
            };
            self.next_free = next;
            self.entries[index] = Entry::Occupied(value);
        }
        self.len += 1;
        index
    }

    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        match self.entries.get(index) {
            Some(Entry::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        match self.entries.get_mut(index) {
            Some(Entry::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn remove(&mut self, index: usize) -> Option<T> {
        if !matches!(self.entries.get(index), Some(Entry::Occupied(_))) {
            return None;
        }
        let old = std::mem::replace(&mut self.entries[index], Entry::Vacant(self.next_free));
        self.next_free = index;
        self.len -= 1;
        match old {
            Entry::Occupied(value) => Some(value),
            Entry::Vacant(_) => None,
        }
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }
}
