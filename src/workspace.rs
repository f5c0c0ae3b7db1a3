use core::fmt;
use core::mem::size_of;

/// A working buffer could not be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError {
    /// Bytes requested by the failing allocation.
    pub bytes: usize,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to allocate {} bytes of workspace", self.bytes)
    }
}

impl std::error::Error for AllocError {}

/// Hands out the per-call working buffers.
///
/// Every buffer is a plain `Vec` owned by the caller of `alloc`, so it is
/// released on whichever path leaves its scope. The optional byte budget
/// caps the total handed out during one solve.
#[derive(Debug)]
pub(crate) struct Workspace {
    limit: Option<usize>,
    used: usize,
    buffers: usize,
}

impl Workspace {
    pub(crate) fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            used: 0,
            buffers: 0,
        }
    }

    /// Allocates `len` copies of `fill`.
    pub(crate) fn alloc<T: Clone>(&mut self, len: usize, fill: T) -> Result<Vec<T>, AllocError> {
        let mut buf = self.reserve::<T>(len)?;
        buf.resize(len, fill);
        Ok(buf)
    }

    /// Allocates a private copy of `src`.
    pub(crate) fn copy_of<T: Copy>(&mut self, src: &[T]) -> Result<Vec<T>, AllocError> {
        let mut buf = self.reserve::<T>(src.len())?;
        buf.extend_from_slice(src);
        Ok(buf)
    }

    /// Allocates an empty buffer with room for `len` elements.
    pub(crate) fn with_capacity<T>(&mut self, len: usize) -> Result<Vec<T>, AllocError> {
        self.reserve::<T>(len)
    }

    /// Total bytes handed out so far.
    pub(crate) fn used(&self) -> usize {
        self.used
    }

    pub(crate) fn buffers(&self) -> usize {
        self.buffers
    }

    fn reserve<T>(&mut self, len: usize) -> Result<Vec<T>, AllocError> {
        let bytes = len.checked_mul(size_of::<T>()).ok_or(AllocError { bytes: usize::MAX })?;
        let total = self.used.checked_add(bytes).ok_or(AllocError { bytes })?;
        if let Some(limit) = self.limit {
            if total > limit {
                log::debug!("workspace budget exceeded: {total} > {limit} bytes");
                return Err(AllocError { bytes });
            }
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(len).map_err(|_| AllocError { bytes })?;
        self.used = total;
        self.buffers += 1;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_usage() {
        let mut ws = Workspace::new(None);
        let a = ws.alloc(4, 0.0f64).unwrap();
        let b = ws.copy_of(&[1usize, 2, 3]).unwrap();
        assert_eq!(a.len(), 4);
        assert_eq!(b, vec![1, 2, 3]);
        assert_eq!(ws.used(), 4 * 8 + 3 * size_of::<usize>());
        assert_eq!(ws.buffers(), 2);
    }

    #[test]
    fn refuses_past_limit() {
        let mut ws = Workspace::new(Some(40));
        let _a = ws.alloc(4, 0.0f64).unwrap();
        let err = ws.alloc(2, 0.0f64).unwrap_err();
        assert_eq!(err, AllocError { bytes: 16 });
        assert_eq!(ws.used(), 32);
        let _b = ws.alloc(1, 0.0f64).unwrap();
    }
}
