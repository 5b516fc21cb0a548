/// An open file as seen by a process: the standard terminal streams or a file on disk.
pub trait FileDescriptor: Send + Sync {
    /// Reads up to `buf.len()` bytes, returning how many were read. Zero means end of input.
    fn read(&self, buf: &mut [u8]) -> usize;

    /// Writes `buf`, returning how many bytes were accepted.
    fn write(&self, buf: &[u8]) -> usize;

    /// Returns the size in bytes of the underlying file, or zero for streams.
    fn size(&self) -> usize;

    /// Copies up to `buf.len()` bytes starting at `offset` into `buf`.
    fn load(&self, buf: &mut [u8], offset: usize) -> usize;
}
