//! Diagnostics on stderr.

use std::sync::atomic::AtomicBool;

/// Enables `trace!` output; see `config::trace_from_env`.
pub static TRACE: AtomicBool = AtomicBool::new(false);

#[macro_export]
macro_rules! warn {
    ($formatstr:expr $(,$arg:expr)*) => { {
        use std::io::Write;
        let mut outp = std::io::BufWriter::new(std::io::stderr().lock());
        let _ = write!(&mut outp, "W: ");
        let _ = write!(&mut outp, $formatstr $(,$arg)*);
        let _ = writeln!(&mut outp, " at {:?} line {}", file!(), line!());
        let _ = outp.flush();
    } }
}

/// Like `warn!`, but only printed while `TRACE` is set.
#[macro_export]
macro_rules! trace {
    ($formatstr:expr $(,$arg:expr)*) => {
        if $crate::warn::TRACE.load(std::sync::atomic::Ordering::Relaxed) {
            use std::io::Write;
            let mut outp = std::io::BufWriter::new(std::io::stderr().lock());
            let _ = write!(&mut outp, "T: ");
            let _ = write!(&mut outp, $formatstr $(,$arg)*);
            let _ = writeln!(&mut outp);
            let _ = outp.flush();
        }
    }
}
