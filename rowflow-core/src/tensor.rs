//! Tensor: typed, shaped view over a shared byte buffer

use std::fmt;

use bytemuck::Pod;

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::schema::DataType;

/// Trait for plain element types that map to a [`DataType`]
pub trait Element: Pod + Send + Sync + 'static {
    /// The data type tag for this element
    const DATA_TYPE: DataType;
}

macro_rules! impl_element {
    ($($ty:ty => $dt:ident),* $(,)?) => {
        $(impl Element for $ty {
            const DATA_TYPE: DataType = DataType::$dt;
        })*
    };
}

impl_element!(
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
);

/// Per-entry quantization parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Quantization {
    /// Scale per quantized entry
    pub scales: Vec<f32>,

    /// Zero point per quantized entry
    pub zero_points: Vec<i32>,
}

/// A dense multidimensional tensor
#[derive(Clone, PartialEq)]
pub struct Tensor {
    /// Element type
    data_type: DataType,

    /// Shape of the tensor (dimensions); empty for a scalar
    shape: Vec<usize>,

    /// Underlying bytes, row-major
    data: Buffer,

    /// Optional quantization parameters
    quantization: Option<Quantization>,
}

impl Tensor {
    /// Create a tensor from raw bytes, checking the size against the shape
    pub fn from_bytes(data_type: DataType, shape: Vec<usize>, data: Buffer) -> Result<Self> {
        let expected = shape.iter().product::<usize>() * data_type.size_bytes();
        if data.size() != expected {
            return Err(Error::InvalidArgument(format!(
                "buffer of {} bytes does not match shape {:?} of {}",
                data.size(),
                shape,
                data_type
            )));
        }
        Ok(Self {
            data_type,
            shape,
            data,
            quantization: None,
        })
    }

    /// Create a tensor from a slice
    pub fn from_slice<T: Element>(data: &[T], shape: Vec<usize>) -> Result<Self> {
        Self::from_bytes(T::DATA_TYPE, shape, Buffer::from_slice(data))
    }

    /// Create a tensor from a vector
    pub fn from_vec<T: Element>(data: Vec<T>, shape: Vec<usize>) -> Result<Self> {
        Self::from_slice(&data, shape)
    }

    /// Create a one-dimensional tensor holding `data`
    pub fn vector<T: Element>(data: &[T]) -> Self {
        Self {
            data_type: T::DATA_TYPE,
            shape: vec![data.len()],
            data: Buffer::from_slice(data),
            quantization: None,
        }
    }

    /// Create a scalar tensor
    pub fn scalar<T: Element>(value: T) -> Self {
        Self {
            data_type: T::DATA_TYPE,
            shape: Vec::new(),
            data: Buffer::from_slice(&[value]),
            quantization: None,
        }
    }

    /// Attach quantization parameters
    pub fn with_quantization(mut self, quantization: Quantization) -> Result<Self> {
        if quantization.scales.len() != quantization.zero_points.len() {
            return Err(Error::InvalidArgument(format!(
                "quantization has {} scales but {} zero points",
                quantization.scales.len(),
                quantization.zero_points.len()
            )));
        }
        self.quantization = Some(quantization);
        Ok(self)
    }

    /// Get the element type
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Get the shape
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Get the number of elements
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Get the size of the data in bytes
    pub fn size_bytes(&self) -> usize {
        self.data.size()
    }

    /// Get the raw buffer
    pub fn data(&self) -> &Buffer {
        &self.data
    }

    /// Get the quantization parameters, if any
    pub fn quantization(&self) -> Option<&Quantization> {
        self.quantization.as_ref()
    }

    /// Copy the elements out as `T`, checking the element type
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DATA_TYPE != self.data_type {
            return Err(Error::InvalidArgument(format!(
                "tensor holds {}, requested {}",
                self.data_type,
                T::DATA_TYPE
            )));
        }
        Ok(self.data.to_typed_vec())
    }

    /// Reinterpret the tensor with a new shape of the same element count
    pub fn reshape(&self, shape: Vec<usize>) -> Result<Self> {
        if shape.iter().product::<usize>() != self.element_count() {
            return Err(Error::InvalidArgument(format!(
                "cannot reshape {:?} into {:?}",
                self.shape, shape
            )));
        }
        Ok(Self {
            shape,
            ..self.clone()
        })
    }

    /// Stack tensors of identical type and shape along a new leading axis
    ///
    /// Quantization parameters are kept only when every input carries the
    /// same parameters.
    pub fn stack(tensors: &[Tensor]) -> Result<Self> {
        let first = tensors
            .first()
            .ok_or_else(|| Error::InvalidArgument("cannot stack zero tensors".into()))?;
        for tensor in &tensors[1..] {
            if tensor.data_type != first.data_type || tensor.shape != first.shape {
                return Err(Error::Pipeline(format!(
                    "batch: inconsistent tensors, expected {} {:?} but got {} {:?}",
                    first.data_type, first.shape, tensor.data_type, tensor.shape
                )));
            }
        }

        let mut shape = Vec::with_capacity(first.shape.len() + 1);
        shape.push(tensors.len());
        shape.extend_from_slice(&first.shape);

        let quantization = first
            .quantization
            .as_ref()
            .filter(|q| tensors.iter().all(|t| t.quantization.as_ref() == Some(*q)))
            .cloned();

        Ok(Self {
            data_type: first.data_type,
            shape,
            data: Buffer::concat(tensors.iter().map(|t| &t.data)),
            quantization,
        })
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("data_type", &self.data_type)
            .field("shape", &self.shape)
            .field("bytes", &self.data.size())
            .field("quantized", &self.quantization.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_must_match_bytes() {
        assert!(Tensor::from_vec(vec![1i32, 2, 3], vec![2, 2]).is_err());
        let t = Tensor::from_vec(vec![1i32, 2, 3, 4], vec![2, 2]).unwrap();
        assert_eq!(t.element_count(), 4);
        assert_eq!(t.to_vec::<i32>().unwrap(), vec![1, 2, 3, 4]);
        assert!(t.to_vec::<f32>().is_err());
    }

    #[test]
    fn stack_adds_leading_axis() {
        let a = Tensor::vector(&[1u8, 2]);
        let b = Tensor::vector(&[3u8, 4]);
        let stacked = Tensor::stack(&[a, b]).unwrap();
        assert_eq!(stacked.shape(), &[2, 2]);
        assert_eq!(stacked.to_vec::<u8>().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn stack_scalars_yields_vector() {
        let stacked = Tensor::stack(&[Tensor::scalar(7i32), Tensor::scalar(9i32)]).unwrap();
        assert_eq!(stacked.shape(), &[2]);
    }

    #[test]
    fn stack_rejects_mismatched_shapes() {
        let a = Tensor::vector(&[1u8, 2]);
        let b = Tensor::vector(&[3u8]);
        assert!(Tensor::stack(&[a, b]).is_err());
    }

    #[test]
    fn stack_keeps_shared_quantization_only() {
        let q = Quantization {
            scales: vec![0.5],
            zero_points: vec![3],
        };
        let a = Tensor::scalar(1u8).with_quantization(q.clone()).unwrap();
        let b = Tensor::scalar(2u8).with_quantization(q.clone()).unwrap();
        assert_eq!(Tensor::stack(&[a.clone(), b]).unwrap().quantization(), Some(&q));
        let c = Tensor::scalar(2u8);
        assert!(Tensor::stack(&[a, c]).unwrap().quantization().is_none());
    }
}
