//! Minimal reader for NumPy `.npy` arrays as stored inside `.npz` archives.
//!
//! Only C-ordered numeric arrays are supported. Elements are decoded on
//! demand from the raw buffer, so callers can walk large arrays row by row
//! without converting the whole array up front.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

const MAGIC: &[u8] = b"\x93NUMPY";

static DESCR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'descr'\s*:\s*'([^']*)'").expect("valid descr regex"));
static FORTRAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'fortran_order'\s*:\s*(True|False)").expect("valid fortran_order regex")
});
static SHAPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'shape'\s*:\s*\(([^)]*)\)").expect("valid shape regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NpyError {
    #[error("missing NPY magic string")]
    BadMagic,

    #[error("unsupported NPY format version {0}.{1}")]
    UnsupportedVersion(u8, u8),

    #[error("truncated NPY header")]
    TruncatedHeader,

    #[error("NPY header is missing '{0}'")]
    MissingHeaderField(&'static str),

    #[error("invalid shape entry '{0}'")]
    InvalidShape(String),

    #[error("unsupported dtype '{0}'")]
    UnsupportedDtype(String),

    #[error("fortran-ordered arrays are not supported")]
    FortranOrder,

    #[error("array data has {actual} bytes, expected {expected}")]
    DataLength { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    Float { size: usize, order: ByteOrder },
    Signed { size: usize, order: ByteOrder },
    Unsigned { size: usize, order: ByteOrder },
}

impl DType {
    pub fn parse(descr: &str) -> Result<Self, NpyError> {
        let unsupported = || NpyError::UnsupportedDtype(descr.to_string());
        let mut chars = descr.chars();
        let order = match chars.next() {
            Some('<') | Some('|') | Some('=') => ByteOrder::Little,
            Some('>') => ByteOrder::Big,
            _ => return Err(unsupported()),
        };
        let kind = chars.next().ok_or_else(unsupported)?;
        let size: usize = chars.as_str().parse().map_err(|_| unsupported())?;
        match (kind, size) {
            ('f', 4 | 8) => Ok(DType::Float { size, order }),
            ('i', 1 | 2 | 4 | 8) => Ok(DType::Signed { size, order }),
            ('u', 1 | 2 | 4 | 8) => Ok(DType::Unsigned { size, order }),
            _ => Err(unsupported()),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            DType::Float { size, .. } | DType::Signed { size, .. } | DType::Unsigned { size, .. } => {
                *size
            }
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::Float { .. })
    }

    pub fn is_integer(&self) -> bool {
        !self.is_float()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyHeader {
    pub dtype: DType,
    pub fortran_order: bool,
    pub shape: Vec<usize>,
}

impl NpyHeader {
    pub fn parse(dict: &str) -> Result<Self, NpyError> {
        let descr = DESCR_RE
            .captures(dict)
            .and_then(|caps| caps.get(1))
            .ok_or(NpyError::MissingHeaderField("descr"))?;
        let fortran_order = FORTRAN_RE
            .captures(dict)
            .and_then(|caps| caps.get(1))
            .map(|value| value.as_str() == "True")
            .ok_or(NpyError::MissingHeaderField("fortran_order"))?;
        let shape = SHAPE_RE
            .captures(dict)
            .and_then(|caps| caps.get(1))
            .ok_or(NpyError::MissingHeaderField("shape"))?;

        let shape = shape
            .as_str()
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| {
                item.trim_end_matches('L')
                    .parse::<usize>()
                    .map_err(|_| NpyError::InvalidShape(item.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            dtype: DType::parse(descr.as_str())?,
            fortran_order,
            shape,
        })
    }

    /// `None` when the shape overflows `usize`.
    pub fn element_count(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |count, &dim| count.checked_mul(dim))
    }
}

#[derive(Debug, Clone)]
pub struct NpyArray {
    header: NpyHeader,
    len: usize,
    data: Vec<u8>,
}

impl NpyArray {
    pub fn from_bytes(mut bytes: Vec<u8>) -> Result<Self, NpyError> {
        if bytes.len() < 10 || &bytes[..MAGIC.len()] != MAGIC {
            return Err(NpyError::BadMagic);
        }
        let (major, minor) = (bytes[6], bytes[7]);
        let (header_len, header_start) = match major {
            1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
            2 | 3 => {
                if bytes.len() < 12 {
                    return Err(NpyError::TruncatedHeader);
                }
                let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
                (len as usize, 12)
            }
            _ => return Err(NpyError::UnsupportedVersion(major, minor)),
        };
        let data_start = header_start + header_len;
        if bytes.len() < data_start {
            return Err(NpyError::TruncatedHeader);
        }

        let header = NpyHeader::parse(&String::from_utf8_lossy(&bytes[header_start..data_start]))?;
        if header.fortran_order && header.shape.len() > 1 {
            return Err(NpyError::FortranOrder);
        }

        let too_large = || NpyError::InvalidShape(format!("{:?}", header.shape));
        let len = header.element_count().ok_or_else(too_large)?;
        let expected = len
            .checked_mul(header.dtype.size())
            .ok_or_else(too_large)?;
        let actual = bytes.len() - data_start;
        if actual != expected {
            return Err(NpyError::DataLength { expected, actual });
        }
        bytes.drain(..data_start);
        Ok(Self {
            header,
            len,
            data: bytes,
        })
    }

    pub fn header(&self) -> &NpyHeader {
        &self.header
    }

    pub fn shape(&self) -> &[usize] {
        &self.header.shape
    }

    pub fn dtype(&self) -> DType {
        self.header.dtype
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn element_bytes(&self, index: usize) -> [u8; 8] {
        let size = self.header.dtype.size();
        let order = match self.header.dtype {
            DType::Float { order, .. }
            | DType::Signed { order, .. }
            | DType::Unsigned { order, .. } => order,
        };
        let raw = &self.data[index * size..(index + 1) * size];
        let mut buf = [0u8; 8];
        match order {
            ByteOrder::Little => buf[..size].copy_from_slice(raw),
            ByteOrder::Big => {
                for (slot, byte) in buf[..size].iter_mut().zip(raw.iter().rev()) {
                    *slot = *byte;
                }
            }
        }
        buf
    }

    /// Element `index` of a float array (flat, C order).
    pub fn f64_at(&self, index: usize) -> f64 {
        let buf = self.element_bytes(index);
        match self.header.dtype {
            DType::Float { size: 4, .. } => {
                f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64
            }
            DType::Float { .. } => f64::from_le_bytes(buf),
            _ => self.i128_at(index) as f64,
        }
    }

    /// Element `index` of an integer array, widened without loss.
    pub fn i128_at(&self, index: usize) -> i128 {
        let buf = self.element_bytes(index);
        let size = self.header.dtype.size();
        match self.header.dtype {
            DType::Signed { .. } => {
                // sign-extend from the element width
                let shift = 64 - size * 8;
                ((i64::from_le_bytes(buf) << shift) >> shift) as i128
            }
            DType::Unsigned { .. } => u64::from_le_bytes(buf) as i128,
            DType::Float { .. } => self.f64_at(index) as i128,
        }
    }

    /// Row `row` of an array whose trailing dimension is 3.
    pub fn vec3_row(&self, row: usize, width: usize) -> Vec<[f64; 3]> {
        let start = row * width * 3;
        (0..width)
            .map(|atom| {
                let base = start + atom * 3;
                [
                    self.f64_at(base),
                    self.f64_at(base + 1),
                    self.f64_at(base + 2),
                ]
            })
            .collect()
    }
}

/// Serialise a little-endian C-ordered array. Used to build fixture archives.
pub fn encode(descr: &str, shape: &[usize], data: &[u8]) -> Vec<u8> {
    let shape_text = match shape {
        [single] => format!("({single},)"),
        _ => format!(
            "({})",
            shape
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut dict =
        format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': {shape_text}, }}");
    // header is padded so the data starts on a 64-byte boundary
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    dict.push_str(&" ".repeat(padding));
    dict.push('\n');

    let mut out = Vec::with_capacity(MAGIC.len() + 4 + dict.len() + data.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.extend_from_slice(data);
    out
}

pub fn encode_f64(shape: &[usize], values: &[f64]) -> Vec<u8> {
    let data = values
        .iter()
        .flat_map(|value| value.to_le_bytes())
        .collect::<Vec<_>>();
    encode("<f8", shape, &data)
}

pub fn encode_u8(shape: &[usize], values: &[u8]) -> Vec<u8> {
    encode("|u1", shape, values)
}
