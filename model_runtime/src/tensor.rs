use std::collections::{BTreeMap, btree_map};

use ndarray::{ArrayD, IxDyn};

/// A single named tensor of a model.
///
/// `Count` tensors hold integer bookkeeping, like running batch counters, and are never averaged.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    Float(ArrayD<f32>),
    Count(ArrayD<i64>),
}

impl Tensor {
    /// Creates a zero dimensional count tensor.
    pub fn scalar_count(value: i64) -> Self {
        Self::Count(ArrayD::from_elem(IxDyn(&[]), value))
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::Float(a) => a.shape(),
            Tensor::Count(a) => a.shape(),
        }
    }

    /// Returns the amount of elements in the tensor.
    pub fn len(&self) -> usize {
        match self {
            Tensor::Float(a) => a.len(),
            Tensor::Count(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_count(&self) -> bool {
        matches!(self, Tensor::Count(_))
    }

    pub fn as_float(&self) -> Option<&ArrayD<f32>> {
        match self {
            Tensor::Float(a) => Some(a),
            Tensor::Count(_) => None,
        }
    }

    pub fn as_count(&self) -> Option<&ArrayD<i64>> {
        match self {
            Tensor::Count(a) => Some(a),
            Tensor::Float(_) => None,
        }
    }

    /// Checks whether both tensors are of the same kind and shape.
    pub fn same_layout(&self, other: &Tensor) -> bool {
        self.is_count() == other.is_count() && self.shape() == other.shape()
    }

    /// Checks that every float element is finite, counts are always finite.
    pub fn is_finite(&self) -> bool {
        match self {
            Tensor::Float(a) => a.iter().all(|v| v.is_finite()),
            Tensor::Count(_) => true,
        }
    }
}

/// An ordered mapping from parameter name to tensor.
///
/// Ordering is by name, so every reduction over a `Parameters` visits tensors in the same order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    tensors: BTreeMap<String, Tensor>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a tensor, returning the previous one under the same name.
    ///
    /// # Arguments
    /// * `name` - The parameter name.
    /// * `tensor` - The tensor to store.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.tensors.insert(name.into(), tensor)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Tensor> {
        self.tensors.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Returns the total amount of scalar elements across all tensors.
    pub fn num_elements(&self) -> usize {
        self.tensors.values().map(Tensor::len).sum()
    }

    /// Checks that both sets of parameters have the same names, kinds and shapes.
    ///
    /// # Arguments
    /// * `other` - The parameters to compare against.
    pub fn same_layout(&self, other: &Parameters) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|((n1, t1), (n2, t2))| n1 == n2 && t1.same_layout(t2))
    }

    pub fn is_finite(&self) -> bool {
        self.tensors.values().all(Tensor::is_finite)
    }
}

impl FromIterator<(String, Tensor)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Parameters {
    type Item = (String, Tensor);
    type IntoIter = btree_map::IntoIter<String, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.into_iter()
    }
}

impl<'a> IntoIterator for &'a Parameters {
    type Item = (&'a String, &'a Tensor);
    type IntoIter = btree_map::Iter<'a, String, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.iter()
    }
}
