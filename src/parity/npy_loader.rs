//! NPY file loading for reference data comparison
//!
//! Reads NumPy .npy files (format versions 1, 2 and 3) into typed arrays and
//! candle tensors, and writes tensors back out as version 1.0 files.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Element type of an NPY array, parsed from the `descr` header field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    /// `b1`
    Bool,
    /// `u1`
    U8,
    /// `u2`
    U16,
    /// `u4`
    U32,
    /// `u8`
    U64,
    /// `i1`
    I8,
    /// `i2`
    I16,
    /// `i4`
    I32,
    /// `i8`
    I64,
    /// `f4`
    F32,
    /// `f8`
    F64,
}

impl ElementType {
    /// Parse a descr string such as `<f8`, `|u1` or `>i4`.
    ///
    /// Returns the element type and whether the data is big-endian.
    pub fn from_descr(descr: &str) -> Result<(Self, bool)> {
        let (big_endian, code) = match descr.chars().next() {
            Some('<') | Some('|') | Some('=') => (false, &descr[1..]),
            Some('>') => (true, &descr[1..]),
            _ => (false, descr),
        };

        let ty = match code {
            "b1" => Self::Bool,
            "u1" => Self::U8,
            "u2" => Self::U16,
            "u4" => Self::U32,
            "u8" => Self::U64,
            "i1" => Self::I8,
            "i2" => Self::I16,
            "i4" => Self::I32,
            "i8" => Self::I64,
            "f4" => Self::F32,
            "f8" => Self::F64,
            _ => anyhow::bail!("Unsupported dtype: {}", descr),
        };
        Ok((ty, big_endian))
    }

    /// Size of one element in bytes
    pub fn size(&self) -> usize {
        match self {
            Self::Bool | Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    /// NumPy-style name, used in diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::U8 => "uint8",
            Self::U16 => "uint16",
            Self::U32 => "uint32",
            Self::U64 => "uint64",
            Self::I8 => "int8",
            Self::I16 => "int16",
            Self::I32 => "int32",
            Self::I64 => "int64",
            Self::F32 => "float32",
            Self::F64 => "float64",
        }
    }
}

/// NumPy-style name for a candle dtype, so labels read the same whichever
/// container an array came from
pub fn dtype_name(dtype: DType) -> &'static str {
    match dtype {
        DType::U8 => "uint8",
        DType::U32 => "uint32",
        DType::I64 => "int64",
        DType::F16 => "float16",
        DType::F32 => "float32",
        DType::F64 => "float64",
        other => other.as_str(),
    }
}

/// NPY array data
#[derive(Debug, Clone)]
pub struct NpyArray {
    /// Shape of the array (empty for a rank-0 array)
    pub shape: Vec<usize>,
    /// Data type string (e.g., "<f8", "|u1")
    pub dtype: String,
    /// Whether elements are stored column-major
    pub fortran_order: bool,
    /// Raw data bytes
    pub data: Vec<u8>,
}

impl NpyArray {
    /// Get total number of elements
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parsed element type
    pub fn element_type(&self) -> Result<ElementType> {
        ElementType::from_descr(&self.dtype).map(|(ty, _)| ty)
    }

    /// Values cast to f64, row-major
    pub fn to_f64(&self) -> Result<Vec<f64>> {
        let (ty, be) = ElementType::from_descr(&self.dtype)?;
        let values: Vec<f64> = match ty {
            ElementType::Bool | ElementType::U8 => {
                self.data.iter().map(|&b| b as f64).collect()
            }
            ElementType::I8 => self.data.iter().map(|&b| b as i8 as f64).collect(),
            ElementType::U16 => read_elems::<2, u16>(&self.data, be, u16::from_le_bytes, u16::from_be_bytes)
                .into_iter()
                .map(f64::from)
                .collect(),
            ElementType::I16 => read_elems::<2, i16>(&self.data, be, i16::from_le_bytes, i16::from_be_bytes)
                .into_iter()
                .map(f64::from)
                .collect(),
            ElementType::U32 => read_elems::<4, u32>(&self.data, be, u32::from_le_bytes, u32::from_be_bytes)
                .into_iter()
                .map(f64::from)
                .collect(),
            ElementType::I32 => read_elems::<4, i32>(&self.data, be, i32::from_le_bytes, i32::from_be_bytes)
                .into_iter()
                .map(f64::from)
                .collect(),
            ElementType::U64 => read_elems::<8, u64>(&self.data, be, u64::from_le_bytes, u64::from_be_bytes)
                .into_iter()
                .map(|v| v as f64)
                .collect(),
            ElementType::I64 => read_elems::<8, i64>(&self.data, be, i64::from_le_bytes, i64::from_be_bytes)
                .into_iter()
                .map(|v| v as f64)
                .collect(),
            ElementType::F32 => read_elems::<4, f32>(&self.data, be, f32::from_le_bytes, f32::from_be_bytes)
                .into_iter()
                .map(f64::from)
                .collect(),
            ElementType::F64 => read_elems::<8, f64>(&self.data, be, f64::from_le_bytes, f64::from_be_bytes),
        };
        Ok(self.row_major(values))
    }

    /// Convert to a tensor, widening to the nearest dtype candle supports
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        let (ty, be) = ElementType::from_descr(&self.dtype)?;
        let shape = self.shape.clone();

        let tensor = match ty {
            ElementType::Bool | ElementType::U8 => {
                Tensor::from_vec(self.row_major(self.data.clone()), shape, device)?
            }
            ElementType::U16 => {
                let v: Vec<u32> = read_elems::<2, u16>(&self.data, be, u16::from_le_bytes, u16::from_be_bytes)
                    .into_iter()
                    .map(u32::from)
                    .collect();
                Tensor::from_vec(self.row_major(v), shape, device)?
            }
            ElementType::U32 => {
                let v = read_elems::<4, u32>(&self.data, be, u32::from_le_bytes, u32::from_be_bytes);
                Tensor::from_vec(self.row_major(v), shape, device)?
            }
            ElementType::I8 => {
                let v: Vec<i64> = self.data.iter().map(|&b| b as i8 as i64).collect();
                Tensor::from_vec(self.row_major(v), shape, device)?
            }
            ElementType::I16 => {
                let v: Vec<i64> = read_elems::<2, i16>(&self.data, be, i16::from_le_bytes, i16::from_be_bytes)
                    .into_iter()
                    .map(i64::from)
                    .collect();
                Tensor::from_vec(self.row_major(v), shape, device)?
            }
            ElementType::I32 => {
                let v: Vec<i64> = read_elems::<4, i32>(&self.data, be, i32::from_le_bytes, i32::from_be_bytes)
                    .into_iter()
                    .map(i64::from)
                    .collect();
                Tensor::from_vec(self.row_major(v), shape, device)?
            }
            ElementType::I64 => {
                let v = read_elems::<8, i64>(&self.data, be, i64::from_le_bytes, i64::from_be_bytes);
                Tensor::from_vec(self.row_major(v), shape, device)?
            }
            // candle has no u64; f64 keeps every value the comparison can see
            ElementType::U64 => Tensor::from_vec(self.to_f64()?, shape, device)?,
            ElementType::F32 => {
                let v = read_elems::<4, f32>(&self.data, be, f32::from_le_bytes, f32::from_be_bytes);
                Tensor::from_vec(self.row_major(v), shape, device)?
            }
            ElementType::F64 => {
                let v = read_elems::<8, f64>(&self.data, be, f64::from_le_bytes, f64::from_be_bytes);
                Tensor::from_vec(self.row_major(v), shape, device)?
            }
        };

        Ok(tensor)
    }

    fn row_major<T: Copy>(&self, values: Vec<T>) -> Vec<T> {
        if self.fortran_order && self.shape.len() > 1 {
            fortran_to_c_order(&values, &self.shape)
        } else {
            values
        }
    }
}

/// Load an NPY file
pub fn load_npy<P: AsRef<Path>>(path: P) -> Result<NpyArray> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open NPY file: {:?}", path))?;
    let mut reader = BufReader::new(file);
    read_npy(&mut reader).with_context(|| format!("Failed to parse NPY file: {:?}", path))
}

/// Read an NPY array from any reader
pub fn read_npy<R: Read>(reader: &mut R) -> Result<NpyArray> {
    // Read magic number (6 bytes: \x93NUMPY)
    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        anyhow::bail!("Invalid NPY magic number");
    }

    // Read version (2 bytes)
    let mut version = [0u8; 2];
    reader.read_exact(&mut version)?;
    let major = version[0];

    // Read header length
    let header_len = match major {
        1 => {
            let mut len_bytes = [0u8; 2];
            reader.read_exact(&mut len_bytes)?;
            u16::from_le_bytes(len_bytes) as usize
        }
        2 | 3 => {
            let mut len_bytes = [0u8; 4];
            reader.read_exact(&mut len_bytes)?;
            u32::from_le_bytes(len_bytes) as usize
        }
        v => anyhow::bail!("Unsupported NPY version: {}.{}", v, version[1]),
    };

    // Read header
    let mut header_bytes = vec![0u8; header_len];
    reader.read_exact(&mut header_bytes)?;
    let header = String::from_utf8_lossy(&header_bytes);

    let dtype = parse_dtype(&header)?;
    let shape = parse_shape(&header)?;
    let fortran_order = parse_fortran_order(&header)?;

    let (elem, _) = ElementType::from_descr(&dtype)?;
    let data_size = shape
        .iter()
        .try_fold(elem.size(), |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| anyhow::anyhow!("NPY shape {:?} overflows the addressable size", shape))?;

    // Read data; the buffer grows with what the file holds, not the header's claim
    let mut data = Vec::new();
    reader.take(data_size as u64).read_to_end(&mut data)?;
    if data.len() != data_size {
        anyhow::bail!(
            "NPY data truncated, expected {} bytes but found {}",
            data_size,
            data.len()
        );
    }

    Ok(NpyArray { shape, dtype, fortran_order, data })
}

/// Write a tensor as a little-endian, C-order NPY v1.0 file
pub fn save_npy<P: AsRef<Path>>(path: P, tensor: &Tensor) -> Result<()> {
    let path = path.as_ref();
    let flat = tensor.flatten_all()?;

    let (descr, data): (&str, Vec<u8>) = match tensor.dtype() {
        DType::U8 => ("|u1", flat.to_vec1::<u8>()?),
        DType::U32 => ("<u4", flat.to_vec1::<u32>()?.iter().flat_map(|v| v.to_le_bytes()).collect()),
        DType::I64 => ("<i8", flat.to_vec1::<i64>()?.iter().flat_map(|v| v.to_le_bytes()).collect()),
        DType::F64 => ("<f8", flat.to_vec1::<f64>()?.iter().flat_map(|v| v.to_le_bytes()).collect()),
        _ => (
            "<f4",
            flat.to_dtype(DType::F32)?
                .to_vec1::<f32>()?
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect(),
        ),
    };

    let header = format_header(descr, tensor.dims());

    let file = File::create(path)
        .with_context(|| format!("Failed to create NPY file: {:?}", path))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&(header.len() as u16).to_le_bytes())?;
    writer.write_all(header.as_bytes())?;
    writer.write_all(&data)?;
    writer.flush()?;
    Ok(())
}

/// Build a v1.0 header dict padded so the data starts on a 64-byte boundary
fn format_header(descr: &str, shape: &[usize]) -> String {
    let shape_str = match shape {
        [] => "()".to_string(),
        [n] => format!("({},)", n),
        dims => format!(
            "({})",
            dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut header = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
        descr, shape_str
    );

    // magic (6) + version (2) + length (2) + header + '\n'
    let unpadded = MAGIC.len() + 4 + header.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    header.push_str(&" ".repeat(padding));
    header.push('\n');
    header
}

/// Decode fixed-width elements with the given byte order
fn read_elems<const N: usize, T>(
    data: &[u8],
    big_endian: bool,
    from_le: fn([u8; N]) -> T,
    from_be: fn([u8; N]) -> T,
) -> Vec<T> {
    data.chunks_exact(N)
        .map(|chunk| {
            let mut bytes = [0u8; N];
            bytes.copy_from_slice(chunk);
            if big_endian {
                from_be(bytes)
            } else {
                from_le(bytes)
            }
        })
        .collect()
}

/// Reorder column-major values into row-major order for the same shape
fn fortran_to_c_order<T: Copy>(values: &[T], shape: &[usize]) -> Vec<T> {
    let mut f_strides = vec![1usize; shape.len()];
    for k in 1..shape.len() {
        f_strides[k] = f_strides[k - 1] * shape[k - 1];
    }

    let mut out = Vec::with_capacity(values.len());
    let mut index = vec![0usize; shape.len()];
    for _ in 0..values.len() {
        let offset: usize = index.iter().zip(&f_strides).map(|(i, s)| i * s).sum();
        out.push(values[offset]);

        // Advance the row-major multi-index, last axis fastest
        for axis in (0..shape.len()).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    out
}

/// Parse dtype from NPY header
fn parse_dtype(header: &str) -> Result<String> {
    // Look for 'descr': '<f4' or similar
    let start = header.find("'descr'")
        .or_else(|| header.find("\"descr\""))
        .ok_or_else(|| anyhow::anyhow!("No descr in header"))?;

    let rest = &header[start + "'descr'".len()..];
    let colon = rest.find(':').ok_or_else(|| anyhow::anyhow!("No colon after descr"))?;
    let after_colon = &rest[colon + 1..];

    // Find the dtype string
    let quote_start = after_colon.find(['\'', '"'])
        .ok_or_else(|| anyhow::anyhow!("No dtype string"))?;
    let quote_char = &after_colon[quote_start..quote_start + 1];
    let dtype_start = quote_start + 1;
    let dtype_end = after_colon[dtype_start..].find(quote_char)
        .ok_or_else(|| anyhow::anyhow!("Unclosed dtype string"))?;

    Ok(after_colon[dtype_start..dtype_start + dtype_end].to_string())
}

/// Parse fortran_order flag from NPY header
fn parse_fortran_order(header: &str) -> Result<bool> {
    let Some(start) = header.find("'fortran_order'").or_else(|| header.find("\"fortran_order\"")) else {
        return Ok(false);
    };

    let rest = &header[start..];
    let colon = rest.find(':')
        .ok_or_else(|| anyhow::anyhow!("No colon after fortran_order"))?;
    let value = rest[colon + 1..].trim_start();

    if value.starts_with("True") {
        Ok(true)
    } else if value.starts_with("False") {
        Ok(false)
    } else {
        anyhow::bail!("Invalid fortran_order value")
    }
}

/// Parse shape from NPY header
fn parse_shape(header: &str) -> Result<Vec<usize>> {
    // Look for 'shape': (1, 2, 3) or similar
    let start = header.find("'shape'")
        .or_else(|| header.find("\"shape\""))
        .ok_or_else(|| anyhow::anyhow!("No shape in header"))?;

    let rest = &header[start..];
    let paren_start = rest.find('(')
        .ok_or_else(|| anyhow::anyhow!("No shape tuple"))?;
    let paren_end = rest.find(')')
        .ok_or_else(|| anyhow::anyhow!("Unclosed shape tuple"))?;

    let shape_str = &rest[paren_start + 1..paren_end];

    // Parse comma-separated integers; NumPy may write 3L on old versions
    shape_str
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|e| anyhow::anyhow!("Invalid shape element {:?}: {}", s, e))
        })
        .collect()
}
