//! Collection dependency graph.

use std::collections::{BTreeMap, BTreeSet};

use crate::image::RecordImage;

/// Edges from each collection to the collections its records reference.
///
/// Every image collection is a node, including those with no references.
/// A collection whose records reference records of the same collection keeps
/// its self-loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Derive the graph from every reference in an image.
    pub fn from_image(image: &RecordImage) -> Self {
        let edges = image
            .collections
            .iter()
            .map(|(collection, records)| {
                let deps = records
                    .values()
                    .flat_map(|value| value.references())
                    .map(|r| r.model.clone())
                    .collect();
                (collection.clone(), deps)
            })
            .collect();
        Self { edges }
    }

    /// Build a graph from explicit edges.
    pub fn from_edges<C, D, I>(edges: I) -> Self
    where
        C: Into<String>,
        D: Into<String>,
        I: IntoIterator<Item = (C, Vec<D>)>,
    {
        let edges = edges
            .into_iter()
            .map(|(c, deps)| (c.into(), deps.into_iter().map(Into::into).collect()))
            .collect();
        Self { edges }
    }

    /// Collections the given collection depends on.
    pub fn dependencies(&self, collection: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(collection)
    }

    /// Whether a collection references its own records.
    pub fn is_self_referential(&self, collection: &str) -> bool {
        self.edges
            .get(collection)
            .is_some_and(|deps| deps.contains(collection))
    }

    /// Whether the collection is a node of the graph.
    pub fn contains(&self, collection: &str) -> bool {
        self.edges.contains_key(collection)
    }

    /// All nodes, in key order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    /// All edges, in key order.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.edges.iter().map(|(c, deps)| (c.as_str(), deps))
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use karmasync_proto::Value;

    #[test]
    fn test_graph_from_image() {
        let mut image = RecordImage::default();
        image.insert("authors", "a1", Value::structure([("name", Value::from("Ada"))]));
        image.insert(
            "posts",
            "p1",
            Value::structure([
                ("author", Value::reference("authors", "a1")),
                ("reply_to", Value::reference("posts", "p0")),
                (
                    "tags",
                    Value::List(vec![Value::reference("tags", "t1"), Value::reference("tags", "t2")]),
                ),
            ]),
        );

        let graph = DependencyGraph::from_image(&image);
        assert_eq!(graph.len(), 2);
        assert!(graph.dependencies("authors").unwrap().is_empty());
        let deps: Vec<&str> = graph
            .dependencies("posts")
            .unwrap()
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(deps, vec!["authors", "posts", "tags"]);
        assert!(graph.is_self_referential("posts"));
        assert!(!graph.is_self_referential("authors"));
        assert!(!graph.contains("tags"));
    }

    #[test]
    fn test_empty_collection_is_a_node() {
        let mut image = RecordImage::default();
        image.add_collection("empty");
        let graph = DependencyGraph::from_image(&image);
        assert!(graph.contains("empty"));
    }
}
