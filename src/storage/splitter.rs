//! Partition Splitter
//!
//! Oversized partitions are divided into children stored next to the parent
//! under `<parent>_split_<i>`. How a payload is divided is a pluggable
//! [`SplitStrategy`]; the store only decides when.
//!
//! # Termination
//!
//! A child is split again only when it is strictly smaller than its parent
//! and its depth is below `max_split_depth`. A strategy that returns copies
//! of the parent therefore produces exactly one generation.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::ports::SplitStrategy;
use crate::error::Result;

/// Id of the `index`-th child of `parent_id`
pub fn child_id(parent_id: &str, index: usize) -> String {
    format!("{}_split_{}", parent_id, index)
}

// =============================================================================
// Strategies
// =============================================================================

/// Copies the parent payload into `fanout` children.
///
/// Demonstrates the split control flow without dividing content.
#[derive(Debug, Clone, Copy)]
pub struct DuplicateSplit {
    fanout: usize,
}

impl DuplicateSplit {
    /// Fanout is raised to at least 2
    pub fn new(fanout: usize) -> Self {
        Self {
            fanout: fanout.max(2),
        }
    }

    pub fn fanout(&self) -> usize {
        self.fanout
    }

    /// Nominal share of the parent each child stands for
    pub fn ratio(&self) -> f64 {
        1.0 / self.fanout as f64
    }
}

impl Default for DuplicateSplit {
    fn default() -> Self {
        Self::new(2)
    }
}

impl<T: Clone> SplitStrategy<T> for DuplicateSplit {
    fn name(&self) -> &str {
        "duplicate"
    }

    fn split(&self, _parent_id: &str, payload: &T) -> Result<Vec<T>> {
        Ok(vec![payload.clone(); self.fanout])
    }
}

/// Splits top-level JSON arrays into contiguous chunks.
///
/// Arrays shorter than two elements and non-array values are duplicated
/// instead.
#[derive(Debug, Clone, Copy)]
pub struct JsonArraySplit {
    chunks: usize,
}

impl JsonArraySplit {
    pub fn new(chunks: usize) -> Self {
        Self {
            chunks: chunks.max(2),
        }
    }
}

impl Default for JsonArraySplit {
    fn default() -> Self {
        Self::new(2)
    }
}

impl SplitStrategy<Value> for JsonArraySplit {
    fn name(&self) -> &str {
        "json_array"
    }

    fn split(&self, parent_id: &str, payload: &Value) -> Result<Vec<Value>> {
        match payload {
            Value::Array(items) if items.len() >= 2 => {
                let chunks = self.chunks.min(items.len());
                let chunk_len = items.len().div_ceil(chunks);
                Ok(items
                    .chunks(chunk_len)
                    .map(|chunk| Value::Array(chunk.to_vec()))
                    .collect())
            }
            _ => DuplicateSplit::new(self.chunks).split(parent_id, payload),
        }
    }
}

/// Adapts a closure into a [`SplitStrategy`]
pub struct FnSplit<F> {
    name: String,
    f: F,
}

impl<F> FnSplit<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<T, F> SplitStrategy<T> for FnSplit<F>
where
    F: Fn(&str, &T) -> Result<Vec<T>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn split(&self, parent_id: &str, payload: &T) -> Result<Vec<T>> {
        (self.f)(parent_id, payload)
    }
}

impl<F> std::fmt::Debug for FnSplit<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSplit").field("name", &self.name).finish()
    }
}

// =============================================================================
// Splitter
// =============================================================================

/// Position of a partition in a split tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SplitLineage {
    /// 0 for partitions stored by callers
    pub depth: u32,
    /// Serialized size of the parent, for children
    pub parent_size: Option<u64>,
}

impl SplitLineage {
    /// Lineage of a partition stored directly by a caller
    pub fn root() -> Self {
        Self::default()
    }

    /// Lineage of the children of a partition of `size` bytes
    pub fn child_of(&self, size: u64) -> Self {
        Self {
            depth: self.depth + 1,
            parent_size: Some(size),
        }
    }
}

/// Children to store for one split
#[derive(Debug, Clone)]
pub struct SplitPlan<T> {
    pub parent_id: String,
    pub strategy: String,
    /// `(child id, payload)` in index order
    pub children: Vec<(String, T)>,
    /// Lineage the children are stored with
    pub lineage: SplitLineage,
}

impl<T> SplitPlan<T> {
    pub fn child_ids(&self) -> Vec<String> {
        self.children.iter().map(|(id, _)| id.clone()).collect()
    }
}

/// Decides when to split and produces split plans
pub struct PartitionSplitter<T> {
    strategy: Arc<dyn SplitStrategy<T>>,
    max_depth: u32,
}

impl<T> Clone for PartitionSplitter<T> {
    fn clone(&self) -> Self {
        Self {
            strategy: Arc::clone(&self.strategy),
            max_depth: self.max_depth,
        }
    }
}

impl<T> PartitionSplitter<T> {
    pub fn new(strategy: Arc<dyn SplitStrategy<T>>, max_depth: u32) -> Self {
        Self {
            strategy,
            max_depth,
        }
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Whether an oversized partition of `size` bytes at `lineage` may split
    pub fn may_split(&self, size: u64, lineage: SplitLineage) -> bool {
        lineage.depth < self.max_depth && lineage.parent_size.map_or(true, |parent| size < parent)
    }

    /// Run the strategy. `None` when fewer than two children come back.
    pub fn plan(
        &self,
        parent_id: &str,
        payload: &T,
        size: u64,
        lineage: SplitLineage,
    ) -> Result<Option<SplitPlan<T>>> {
        let children = self.strategy.split(parent_id, payload)?;

        if children.len() < 2 {
            return Ok(None);
        }

        Ok(Some(SplitPlan {
            parent_id: parent_id.to_string(),
            strategy: self.strategy.name().to_string(),
            children: children
                .into_iter()
                .enumerate()
                .map(|(i, child)| (child_id(parent_id, i), child))
                .collect(),
            lineage: lineage.child_of(size),
        }))
    }
}

impl<T> std::fmt::Debug for PartitionSplitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionSplitter")
            .field("strategy", &self.strategy.name())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_child_ids() {
        assert_eq!(child_id("graph", 0), "graph_split_0");
        assert_eq!(child_id("graph_split_1", 0), "graph_split_1_split_0");
    }

    #[test]
    fn test_duplicate_split() {
        let strategy = DuplicateSplit::default();
        let children = SplitStrategy::<String>::split(&strategy, "p", &"data".to_string()).unwrap();
        assert_eq!(children, vec!["data".to_string(), "data".to_string()]);
        assert_eq!(strategy.ratio(), 0.5);
        assert_eq!(DuplicateSplit::new(0).fanout(), 2);
    }

    #[test]
    fn test_json_array_split_chunks() {
        let strategy = JsonArraySplit::new(2);
        let children = strategy.split("p", &json!([1, 2, 3, 4, 5])).unwrap();
        assert_eq!(children, vec![json!([1, 2, 3]), json!([4, 5])]);

        let children = JsonArraySplit::new(4).split("p", &json!([1, 2])).unwrap();
        assert_eq!(children, vec![json!([1]), json!([2])]);
    }

    #[test]
    fn test_json_array_split_falls_back_to_duplicate() {
        let strategy = JsonArraySplit::default();
        let value = json!({"nodes": [1, 2]});
        let children = strategy.split("p", &value).unwrap();
        assert_eq!(children, vec![value.clone(), value]);
    }

    #[test]
    fn test_fn_split() {
        let strategy = FnSplit::new("halves", |_: &str, s: &String| -> Result<Vec<String>> {
            let mid = s.len() / 2;
            Ok(vec![s[..mid].to_string(), s[mid..].to_string()])
        });
        assert_eq!(SplitStrategy::<String>::name(&strategy), "halves");
        assert_eq!(
            strategy.split("p", &"abcd".to_string()).unwrap(),
            vec!["ab".to_string(), "cd".to_string()]
        );
    }

    #[test]
    fn test_may_split_rules() {
        let splitter: PartitionSplitter<String> =
            PartitionSplitter::new(Arc::new(DuplicateSplit::default()), 2);

        let root = SplitLineage::root();
        assert!(splitter.may_split(100, root));

        let child = root.child_of(100);
        assert_eq!(child.depth, 1);
        assert!(!splitter.may_split(100, child), "same size as parent");
        assert!(splitter.may_split(60, child));

        let grandchild = child.child_of(60);
        assert!(!splitter.may_split(10, grandchild), "depth limit");

        let disabled: PartitionSplitter<String> =
            PartitionSplitter::new(Arc::new(DuplicateSplit::default()), 0);
        assert!(!disabled.may_split(100, root));
    }

    #[test]
    fn test_plan_names_children() {
        let splitter: PartitionSplitter<Value> =
            PartitionSplitter::new(Arc::new(JsonArraySplit::new(3)), 2);
        let plan = splitter
            .plan("g", &json!([1, 2, 3]), 7, SplitLineage::root())
            .unwrap()
            .unwrap();

        assert_eq!(plan.strategy, "json_array");
        assert_eq!(plan.child_ids(), vec!["g_split_0", "g_split_1", "g_split_2"]);
        assert_eq!(plan.lineage.depth, 1);
        assert_eq!(plan.lineage.parent_size, Some(7));
    }

    #[test]
    fn test_plan_with_single_child_is_none() {
        let splitter: PartitionSplitter<u32> = PartitionSplitter::new(
            Arc::new(FnSplit::new("one", |_: &str, v: &u32| -> Result<Vec<u32>> {
                Ok(vec![*v])
            })),
            2,
        );
        assert!(splitter.plan("p", &1, 10, SplitLineage::root()).unwrap().is_none());
    }
}
