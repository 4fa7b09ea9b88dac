//! `OwnedOrBorrowed` — like `Cow` but without requiring `T: Clone`. Used where
//! the registry hands back either a reference into its map (read path, no
//! lock held past the borrow) or an owned copy (after a lookup that released
//! the lock).

#[derive(Debug, Clone)]
pub enum OwnedOrBorrowed<'a, T> {
    Borrowed(&'a T),
    Owned(T),
}

impl<'a, T> std::ops::Deref for OwnedOrBorrowed<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            Self::Borrowed(v) => v,
            Self::Owned(v) => v,
        }
    }
}

impl<'a, T> AsRef<T> for OwnedOrBorrowed<'a, T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<'a, T> From<&'a T> for OwnedOrBorrowed<'a, T> {
    fn from(v: &'a T) -> Self {
        Self::Borrowed(v)
    }
}

impl<'a, T> From<T> for OwnedOrBorrowed<'a, T> {
    fn from(v: T) -> Self {
        Self::Owned(v)
    }
}
