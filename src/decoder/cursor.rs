//! A bounds-checked little-endian reader over a borrowed byte slice.
//!
//! Every read names the field it is for, so an underrun reports exactly where
//! the schema and the bytes disagreed. The cursor never panics.

use bytemuck::Pod;
use num_traits::PrimInt;

use crate::error::CmlError;

#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Borrows the next `n` bytes and advances past them.
    pub fn take(&mut self, n: usize, field: &str) -> Result<&'a [u8], CmlError> {
        if n > self.remaining() {
            return Err(CmlError::BufferUnderrun {
                field: field.to_string(),
                offset: self.pos,
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize, field: &str) -> Result<(), CmlError> {
        self.take(n, field).map(|_| ())
    }

    /// Reads one little-endian integer of type `T`.
    pub fn read_le<T>(&mut self, field: &str) -> Result<T, CmlError>
    where
        T: PrimInt + Pod,
    {
        let bytes = self.take(std::mem::size_of::<T>(), field)?;
        Ok(T::from_le(bytemuck::pod_read_unaligned(bytes)))
    }

    pub fn read_f32(&mut self, field: &str) -> Result<f32, CmlError> {
        self.read_le::<u32>(field).map(f32::from_bits)
    }

    pub fn read_f64(&mut self, field: &str) -> Result<f64, CmlError> {
        self.read_le::<u64>(field).map(f64::from_bits)
    }
}
