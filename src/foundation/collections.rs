//! `IVectorView<T>` and its one-shot `IIterator<T>`

use parking_lot::Mutex;

use super::object::{ComPtr, Inspectable, InterfaceId};
use crate::error::WinrtError;

/// Read-only random-access collection
pub struct VectorView<T> {
    items: Vec<T>,
}

impl<T> Inspectable for VectorView<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn runtime_class_name(&self) -> &'static str {
        "Windows.Foundation.Collections.IVectorView`1"
    }

    fn interfaces(&self) -> &'static [InterfaceId] {
        &[InterfaceId::VectorView, InterfaceId::Iterable]
    }
}

impl<T> VectorView<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(items: Vec<T>) -> ComPtr<Self> {
        ComPtr::new(Self { items })
    }

    pub fn size(&self) -> u32 {
        self.items.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get_at(&self, index: u32) -> Result<T, WinrtError> {
        self.items
            .get(index as usize)
            .cloned()
            .ok_or_else(WinrtError::bounds)
    }

    /// Copy items from `start` into `out`; returns how many were copied.
    /// `start == size` copies nothing, anything past it is out of bounds.
    pub fn get_many(&self, start: u32, out: &mut [T]) -> Result<u32, WinrtError> {
        let start = start as usize;
        let rest = self.items.get(start..).ok_or_else(WinrtError::bounds)?;
        let n = rest.len().min(out.len());
        out[..n].clone_from_slice(&rest[..n]);
        Ok(n as u32)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.clone()
    }
}

impl<T> VectorView<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn index_of(&self, value: &T) -> Option<u32> {
        self.items.iter().position(|v| v == value).map(|i| i as u32)
    }
}

impl<T> ComPtr<VectorView<T>>
where
    T: Clone + Send + Sync + 'static,
{
    /// `IIterable::First`. The iterator keeps the view alive.
    pub fn first(&self) -> ComPtr<VectorIterator<T>> {
        ComPtr::new(VectorIterator {
            view: self.clone(),
            position: Mutex::new(0),
        })
    }
}

/// Forward-only cursor over a [`VectorView`]
pub struct VectorIterator<T> {
    view: ComPtr<VectorView<T>>,
    position: Mutex<u32>,
}

impl<T> Inspectable for VectorIterator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn runtime_class_name(&self) -> &'static str {
        "Windows.Foundation.Collections.IIterator`1"
    }

    fn interfaces(&self) -> &'static [InterfaceId] {
        &[InterfaceId::Iterator]
    }
}

impl<T> VectorIterator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn current(&self) -> Result<T, WinrtError> {
        self.view.get_at(*self.position.lock())
    }

    pub fn has_current(&self) -> bool {
        *self.position.lock() < self.view.size()
    }

    /// Advance; returns whether a current item remains
    pub fn move_next(&self) -> Result<bool, WinrtError> {
        let mut pos = self.position.lock();
        if *pos >= self.view.size() {
            return Err(WinrtError::bounds());
        }
        *pos += 1;
        Ok(*pos < self.view.size())
    }

    /// Drain up to `out.len()` items from the current position
    pub fn get_many(&self, out: &mut [T]) -> u32 {
        let mut pos = self.position.lock();
        let n = self.view.get_many(*pos, out).unwrap_or(0);
        *pos += n;
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_indexes_and_bounds() {
        let view = VectorView::new(vec![10u16, 20, 30]);
        assert_eq!(view.size(), 3);
        assert_eq!(view.get_at(2), Ok(30));
        assert_eq!(view.get_at(3), Err(WinrtError::bounds()));
        assert_eq!(view.index_of(&20), Some(1));
        assert_eq!(view.index_of(&99), None);
    }

    #[test]
    fn range_copy_stops_at_the_end() {
        let view = VectorView::new(vec![1u8, 2, 3, 4]);
        let mut out = [0u8; 3];
        assert_eq!(view.get_many(2, &mut out), Ok(2));
        assert_eq!(out, [3, 4, 0]);
        assert_eq!(view.get_many(4, &mut out), Ok(0));
        assert_eq!(view.get_many(5, &mut out), Err(WinrtError::bounds()));
    }

    #[test]
    fn iterator_walks_once_and_shares_the_view() {
        let view = VectorView::new(vec!['a', 'b']);
        let it = view.first();
        assert_eq!(view.ref_count(), 2);

        assert_eq!(it.current(), Ok('a'));
        assert_eq!(it.move_next(), Ok(true));
        assert_eq!(it.current(), Ok('b'));
        assert_eq!(it.move_next(), Ok(false));
        assert!(!it.has_current());
        assert_eq!(it.current(), Err(WinrtError::bounds()));
        assert_eq!(it.move_next(), Err(WinrtError::bounds()));

        drop(it);
        assert_eq!(view.ref_count(), 1);
    }

    #[test]
    fn iterator_get_many_advances() {
        let view = VectorView::new(vec![1u32, 2, 3]);
        let it = view.first();
        let mut out = [0u32; 2];
        assert_eq!(it.get_many(&mut out), 2);
        assert_eq!(out, [1, 2]);
        assert_eq!(it.get_many(&mut out), 1);
        assert_eq!(out[0], 3);
        assert_eq!(it.get_many(&mut out), 0);
    }
}
