// Text persistence for tensors
//
// FORMAT (one tensor = two lines):
//
//   2 3 4
//   0.5 1 -2.25 ...
//
// The header holds the rank followed by each dimension. The second line holds
// all values in row-major order, separated by single spaces. Values are
// written in shortest round-trip form, so save/load is exact for finite
// values. Several tensors may follow each other in one stream.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::shape::Shape;
use crate::tensor::Tensor;

/// Append one tensor to `w`.
pub fn write_tensor<W: Write>(w: &mut W, t: &Tensor) -> Result<()> {
    write!(w, "{}", t.rank())?;
    for d in t.dims() {
        write!(w, " {d}")?;
    }
    writeln!(w)?;
    for (i, v) in t.as_slice().iter().enumerate() {
        if i > 0 {
            write!(w, " ")?;
        }
        write!(w, "{v}")?;
    }
    writeln!(w)?;
    Ok(())
}

/// Line-counting reader over a stream of persisted tensors.
pub struct TensorReader<R> {
    inner: R,
    line: usize,
}

impl<R: BufRead> TensorReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, line: 0 }
    }

    /// 1-based number of the last line read.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Next line without its terminator, or `None` at end of stream.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        let mut buf = String::new();
        if self.inner.read_line(&mut buf)? == 0 {
            return Ok(None);
        }
        self.line += 1;
        let trimmed = buf.trim_end_matches(&['\n', '\r'][..]).len();
        buf.truncate(trimmed);
        Ok(Some(buf))
    }

    fn expect_line(&mut self, what: &str) -> Result<String> {
        let next = self.line + 1;
        self.next_line()?.ok_or_else(|| {
            Error::parse(next, format!("unexpected end of input, expected {what}"))
        })
    }

    /// Read the next tensor.
    pub fn read_tensor(&mut self) -> Result<Tensor> {
        let header = self.expect_line("tensor header")?;
        let line = self.line;
        let mut fields = header.split_whitespace().map(|f| {
            f.parse::<usize>()
                .map_err(|e| Error::parse(line, format!("bad header field `{f}`: {e}")))
        });
        let rank = fields
            .next()
            .ok_or_else(|| Error::parse(line, "empty header"))??;
        let dims = fields.collect::<Result<Vec<usize>>>()?;
        if dims.len() != rank {
            return Err(Error::parse(
                line,
                format!("header declares rank {rank} but lists {} dims", dims.len()),
            ));
        }
        if dims.contains(&0) {
            return Err(Error::parse(line, "dimensions must be positive"));
        }
        let shape = Shape::new(dims);

        let body = self.expect_line("tensor values")?;
        let line = self.line;
        let values = body
            .split_whitespace()
            .map(|f| {
                f.parse::<f32>()
                    .map_err(|e| Error::parse(line, format!("bad value `{f}`: {e}")))
            })
            .collect::<Result<Vec<f32>>>()?;
        if values.len() != shape.elem_count() {
            return Err(Error::parse(
                line,
                format!(
                    "shape {shape} needs {} values, found {}",
                    shape.elem_count(),
                    values.len()
                ),
            ));
        }
        Tensor::from_vec(values, shape)
    }
}

/// Read one tensor from `r`.
pub fn read_tensor<R: BufRead>(r: R) -> Result<Tensor> {
    TensorReader::new(r).read_tensor()
}

pub fn save_tensor(path: impl AsRef<Path>, t: &Tensor) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    write_tensor(&mut w, t)?;
    w.flush()?;
    Ok(())
}

pub fn load_tensor(path: impl AsRef<Path>) -> Result<Tensor> {
    read_tensor(BufReader::new(File::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_layout() {
        let t = Tensor::from_vec(vec![0.5, 1.0, -2.25, 3.0, 4.0, 5.0], (2, 3)).unwrap();
        let mut out = Vec::new();
        write_tensor(&mut out, &t).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "2 2 3\n0.5 1 -2.25 3 4 5\n");
    }

    #[test]
    fn test_stream_of_tensors() {
        let text = "1 2\n1 2\n2 1 1\n7\n";
        let mut r = TensorReader::new(text.as_bytes());
        assert_eq!(r.read_tensor().unwrap().as_slice(), &[1.0, 2.0]);
        let b = r.read_tensor().unwrap();
        assert_eq!(b.dims(), &[1, 1]);
        assert!(r.next_line().unwrap().is_none());
    }

    #[test]
    fn test_malformed_input() {
        let cases = ["2 2\n1 2\n", "1 3\n1 2\n", "1 2\n1 x\n", "1 2\n"];
        for case in cases {
            let err = read_tensor(case.as_bytes()).unwrap_err();
            assert!(matches!(err, Error::Parse { .. }), "{case:?} -> {err}");
        }
    }
}
