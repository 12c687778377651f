//! Named, typed, shaped tensors.
//!
//! The leading dimension of every tensor is the batch dimension. Requests
//! carry one or more rows; the dispatcher stacks rows of many requests along
//! that dimension and splits executor outputs back the same way.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors from building, combining or splitting tensors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TensorError {
    #[error("Tensor '{name}' has {actual} elements but its shape implies {expected}")]
    ShapeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Tensor '{0}' has no batch dimension")]
    MissingBatchDim(String),
    #[error("Tensor '{name}' has invalid data: {reason}")]
    InvalidData { name: String, reason: String },
    #[error("Cannot concatenate tensors: {0}")]
    Incompatible(String),
    #[error("Cannot split tensor '{name}': {expected} rows requested, {actual} available")]
    SplitMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Cannot concatenate an empty tensor list")]
    Empty,
}

/// Element type, named the way KServe-v2 payloads name it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Uint8,
    Int32,
    Int64,
    Fp32,
    Bytes,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uint8 => "UINT8",
            Self::Int32 => "INT32",
            Self::Int64 => "INT64",
            Self::Fp32 => "FP32",
            Self::Bytes => "BYTES",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Flat, row-major tensor contents.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Uint8(Vec<u8>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Fp32(Vec<f32>),
    Bytes(Vec<String>),
}

impl TensorData {
    pub fn datatype(&self) -> DataType {
        match self {
            Self::Uint8(_) => DataType::Uint8,
            Self::Int32(_) => DataType::Int32,
            Self::Int64(_) => DataType::Int64,
            Self::Fp32(_) => DataType::Fp32,
            Self::Bytes(_) => DataType::Bytes,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Uint8(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Fp32(v) => v.len(),
            Self::Bytes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn empty_like(&self, capacity: usize) -> Self {
        match self {
            Self::Uint8(_) => Self::Uint8(Vec::with_capacity(capacity)),
            Self::Int32(_) => Self::Int32(Vec::with_capacity(capacity)),
            Self::Int64(_) => Self::Int64(Vec::with_capacity(capacity)),
            Self::Fp32(_) => Self::Fp32(Vec::with_capacity(capacity)),
            Self::Bytes(_) => Self::Bytes(Vec::with_capacity(capacity)),
        }
    }

    /// Append `other` to `self`. Callers check datatypes first.
    fn extend_from(&mut self, other: &TensorData) {
        match (self, other) {
            (Self::Uint8(a), Self::Uint8(b)) => a.extend_from_slice(b),
            (Self::Int32(a), Self::Int32(b)) => a.extend_from_slice(b),
            (Self::Int64(a), Self::Int64(b)) => a.extend_from_slice(b),
            (Self::Fp32(a), Self::Fp32(b)) => a.extend_from_slice(b),
            (Self::Bytes(a), Self::Bytes(b)) => a.extend(b.iter().cloned()),
            _ => {}
        }
    }

    fn slice(&self, start: usize, end: usize) -> Self {
        match self {
            Self::Uint8(v) => Self::Uint8(v[start..end].to_vec()),
            Self::Int32(v) => Self::Int32(v[start..end].to_vec()),
            Self::Int64(v) => Self::Int64(v[start..end].to_vec()),
            Self::Fp32(v) => Self::Fp32(v[start..end].to_vec()),
            Self::Bytes(v) => Self::Bytes(v[start..end].to_vec()),
        }
    }

    fn to_values(&self) -> Vec<Value> {
        match self {
            Self::Uint8(v) => v.iter().map(|x| Value::from(*x)).collect(),
            Self::Int32(v) => v.iter().map(|x| Value::from(*x)).collect(),
            Self::Int64(v) => v.iter().map(|x| Value::from(*x)).collect(),
            Self::Fp32(v) => v.iter().map(|x| Value::from(f64::from(*x))).collect(),
            Self::Bytes(v) => v.iter().map(|x| Value::from(x.as_str())).collect(),
        }
    }
}

/// A named tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireTensor", into = "WireTensor")]
pub struct Tensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: TensorData,
}

impl Tensor {
    /// Build a tensor, checking that `data` fills `shape` exactly.
    pub fn new(
        name: impl Into<String>,
        shape: Vec<usize>,
        data: TensorData,
    ) -> Result<Self, TensorError> {
        let tensor = Self {
            name: name.into(),
            shape,
            data,
        };
        tensor.validate()?;
        Ok(tensor)
    }

    pub fn fp32(
        name: impl Into<String>,
        shape: Vec<usize>,
        data: Vec<f32>,
    ) -> Result<Self, TensorError> {
        Self::new(name, shape, TensorData::Fp32(data))
    }

    pub fn bytes(
        name: impl Into<String>,
        shape: Vec<usize>,
        data: Vec<String>,
    ) -> Result<Self, TensorError> {
        Self::new(name, shape, TensorData::Bytes(data))
    }

    pub fn datatype(&self) -> DataType {
        self.data.datatype()
    }

    /// Number of elements implied by the shape, `None` if it overflows.
    pub fn numel(&self) -> Option<usize> {
        checked_product(&self.shape)
    }

    /// Size of the batch dimension.
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Elements per row, `None` if it overflows.
    pub fn row_width(&self) -> Option<usize> {
        self.shape.get(1..).and_then(checked_product)
    }

    fn overflow(&self) -> TensorError {
        TensorError::InvalidData {
            name: self.name.clone(),
            reason: format!("shape {:?} overflows the element count", self.shape),
        }
    }

    pub fn as_fp32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::Fp32(v) => Some(v),
            _ => None,
        }
    }

    /// Check rank and element count.
    pub fn validate(&self) -> Result<(), TensorError> {
        if self.shape.is_empty() {
            return Err(TensorError::MissingBatchDim(self.name.clone()));
        }
        let expected = self.numel().ok_or_else(|| self.overflow())?;
        let actual = self.data.len();
        if expected != actual {
            return Err(TensorError::ShapeMismatch {
                name: self.name.clone(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Stack tensors along the batch dimension.
    ///
    /// All parts must share name, datatype and trailing dimensions.
    pub fn concat(parts: &[&Tensor]) -> Result<Tensor, TensorError> {
        let first = parts.first().ok_or(TensorError::Empty)?;
        first.validate()?;

        let trailing = &first.shape[1..];
        let total_len: usize = parts.iter().map(|t| t.data.len()).sum();
        let mut data = first.data.empty_like(total_len);
        let mut rows = 0;

        for part in parts {
            part.validate()?;
            if part.name != first.name {
                return Err(TensorError::Incompatible(format!(
                    "input names differ ('{}' vs '{}')",
                    first.name, part.name
                )));
            }
            if part.datatype() != first.datatype() {
                return Err(TensorError::Incompatible(format!(
                    "'{}' mixes {} and {}",
                    first.name,
                    first.datatype(),
                    part.datatype()
                )));
            }
            if &part.shape[1..] != trailing {
                return Err(TensorError::Incompatible(format!(
                    "'{}' has trailing dims {:?}, expected {:?}",
                    part.name,
                    &part.shape[1..],
                    trailing
                )));
            }
            data.extend_from(&part.data);
            rows = usize::checked_add(rows, part.rows()).ok_or_else(|| {
                TensorError::Incompatible(format!("'{}' batch dimension overflows", first.name))
            })?;
        }

        let mut shape = Vec::with_capacity(first.shape.len());
        shape.push(rows);
        shape.extend_from_slice(trailing);

        Ok(Tensor {
            name: first.name.clone(),
            shape,
            data,
        })
    }

    /// Split along the batch dimension into consecutive chunks of `rows[i]` rows.
    pub fn split(&self, rows: &[usize]) -> Result<Vec<Tensor>, TensorError> {
        self.validate()?;
        let requested = rows
            .iter()
            .try_fold(0usize, |acc, &n| acc.checked_add(n))
            .unwrap_or(usize::MAX);
        if requested != self.rows() {
            return Err(TensorError::SplitMismatch {
                name: self.name.clone(),
                expected: requested,
                actual: self.rows(),
            });
        }

        // A validated shape's element count fits in usize, so no row slice
        // below can overflow either.
        let width = self.row_width().ok_or_else(|| self.overflow())?;
        let mut offset = 0;
        let mut out = Vec::with_capacity(rows.len());
        for &n in rows {
            let mut shape = self.shape.clone();
            shape[0] = n;
            let end = offset + n * width;
            out.push(Tensor {
                name: self.name.clone(),
                shape,
                data: self.data.slice(offset, end),
            });
            offset = end;
        }
        Ok(out)
    }
}

/// KServe-v2 JSON form of a tensor. `data` may be flat or nested.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireTensor {
    name: String,
    shape: Vec<usize>,
    datatype: DataType,
    data: Vec<Value>,
}

impl From<Tensor> for WireTensor {
    fn from(tensor: Tensor) -> Self {
        Self {
            datatype: tensor.datatype(),
            data: tensor.data.to_values(),
            name: tensor.name,
            shape: tensor.shape,
        }
    }
}

impl TryFrom<WireTensor> for Tensor {
    type Error = TensorError;

    fn try_from(wire: WireTensor) -> Result<Self, Self::Error> {
        let mut flat = Vec::with_capacity(wire.data.len());
        flatten(wire.data, &mut flat);

        let invalid = |reason: String| TensorError::InvalidData {
            name: wire.name.clone(),
            reason,
        };

        let data = match wire.datatype {
            DataType::Uint8 => TensorData::Uint8(
                flat.iter()
                    .map(|v| {
                        v.as_u64()
                            .and_then(|x| u8::try_from(x).ok())
                            .ok_or_else(|| invalid(format!("{} is not a UINT8", v)))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            DataType::Int32 => TensorData::Int32(
                flat.iter()
                    .map(|v| {
                        v.as_i64()
                            .and_then(|x| i32::try_from(x).ok())
                            .ok_or_else(|| invalid(format!("{} is not an INT32", v)))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            DataType::Int64 => TensorData::Int64(
                flat.iter()
                    .map(|v| v.as_i64().ok_or_else(|| invalid(format!("{} is not an INT64", v))))
                    .collect::<Result<_, _>>()?,
            ),
            DataType::Fp32 => TensorData::Fp32(
                flat.iter()
                    .map(|v| {
                        v.as_f64()
                            .map(|x| x as f32)
                            .ok_or_else(|| invalid(format!("{} is not an FP32", v)))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            DataType::Bytes => TensorData::Bytes(
                flat.iter()
                    .map(|v| {
                        v.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| invalid(format!("{} is not a string", v)))
                    })
                    .collect::<Result<_, _>>()?,
            ),
        };

        Tensor::new(wire.name, wire.shape, data)
    }
}

fn checked_product(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

fn flatten(values: Vec<Value>, out: &mut Vec<Value>) {
    for value in values {
        match value {
            Value::Array(inner) => flatten(inner, out),
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_wrong_element_count() {
        let err = Tensor::fp32("x", vec![2, 3], vec![1.0; 5]).unwrap_err();
        assert_eq!(
            err,
            TensorError::ShapeMismatch {
                name: "x".to_string(),
                expected: 6,
                actual: 5
            }
        );
    }

    #[test]
    fn test_overflowing_shape_is_rejected() {
        let json = r#"{"name":"x","shape":[4294967296,4294967296,16],"datatype":"FP32","data":[]}"#;
        let err = serde_json::from_str::<Tensor>(json).unwrap_err();
        assert!(err.to_string().contains("overflows"), "{}", err);

        let tensor = Tensor {
            name: "x".to_string(),
            shape: vec![usize::MAX, 2],
            data: TensorData::Fp32(vec![]),
        };
        assert!(tensor.numel().is_none());
        assert!(matches!(tensor.validate(), Err(TensorError::InvalidData { .. })));
        assert!(tensor.split(&[usize::MAX]).is_err());
    }

    #[test]
    fn test_validate_requires_batch_dim() {
        let err = Tensor::fp32("x", vec![], vec![1.0]).unwrap_err();
        assert!(matches!(err, TensorError::MissingBatchDim(_)));
    }

    #[test]
    fn test_concat_then_split() {
        let a = Tensor::fp32("x", vec![1, 2], vec![1.0, 2.0]).unwrap();
        let b = Tensor::fp32("x", vec![2, 2], vec![3.0, 4.0, 5.0, 6.0]).unwrap();

        let merged = Tensor::concat(&[&a, &b]).unwrap();
        assert_eq!(merged.shape, vec![3, 2]);
        assert_eq!(merged.as_fp32().unwrap(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let parts = merged.split(&[1, 2]).unwrap();
        assert_eq!(parts[0], a);
        assert_eq!(parts[1], b);
    }

    #[test]
    fn test_concat_rejects_mixed_types() {
        let a = Tensor::fp32("x", vec![1], vec![1.0]).unwrap();
        let b = Tensor::new("x", vec![1], TensorData::Int64(vec![1])).unwrap();
        assert!(matches!(
            Tensor::concat(&[&a, &b]),
            Err(TensorError::Incompatible(_))
        ));
    }

    #[test]
    fn test_concat_rejects_trailing_dim_mismatch() {
        let a = Tensor::fp32("x", vec![1, 2], vec![1.0, 2.0]).unwrap();
        let b = Tensor::fp32("x", vec![1, 3], vec![1.0, 2.0, 3.0]).unwrap();
        assert!(Tensor::concat(&[&a, &b]).is_err());
    }

    #[test]
    fn test_split_row_count_mismatch() {
        let t = Tensor::fp32("y", vec![3, 1], vec![1.0, 2.0, 3.0]).unwrap();
        let err = t.split(&[1, 1]).unwrap_err();
        assert!(matches!(err, TensorError::SplitMismatch { expected: 2, actual: 3, .. }));
    }

    #[test]
    fn test_deserialize_nested_kserve_data() {
        let json = r#"{
            "name": "INPUT__0",
            "shape": [2, 2],
            "datatype": "UINT8",
            "data": [[1, 2], [3, 4]]
        }"#;
        let tensor: Tensor = serde_json::from_str(json).unwrap();
        assert_eq!(tensor.data, TensorData::Uint8(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_deserialize_rejects_out_of_range_uint8() {
        let json = r#"{"name": "x", "shape": [1], "datatype": "UINT8", "data": [300]}"#;
        assert!(serde_json::from_str::<Tensor>(json).is_err());
    }

    #[test]
    fn test_serialize_bytes_tensor() {
        let tensor = Tensor::bytes("text", vec![1], vec!["great".to_string()]).unwrap();
        let json = serde_json::to_value(&tensor).unwrap();
        assert_eq!(json["datatype"], "BYTES");
        assert_eq!(json["data"][0], "great");
    }
}
