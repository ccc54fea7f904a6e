//! Query expressions.
//!
//! The typed subset of the expression language that the migration engine
//! sends through a transport, together with its JSON encoding. Every node is
//! a single-key object keyed by the node name.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Map as JsonMap, Value as Json};

use crate::value::Value;

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A literal value. Placeholders inside it are late-bound ids.
    Data(Value),
    /// A variable bound by an enclosing function.
    Scope(String),
    /// Field `name` of the result of the inner expression.
    Field(String, Box<Expression>),
    /// The collection id bound to a built-in tag.
    Tag(String),
    /// Every record reference of the collection the inner expression names.
    AllReferences(Box<Expression>),
    /// A window of a list.
    Slice {
        /// The list.
        value: Box<Expression>,
        /// Index of the first element.
        offset: usize,
        /// Maximum number of elements.
        length: usize,
    },
    /// Apply a one-parameter function to every element of a list.
    MapList {
        /// The list.
        value: Box<Expression>,
        /// The function.
        function: Function,
    },
    /// Materialize a reference into its full record row.
    Metarialize(Box<Expression>),
    /// Create several records of one collection in a single request.
    ///
    /// Each value is a one-parameter function; the parameter is bound to the
    /// map of local keys to the ids allocated for this request.
    CreateMultiple {
        /// Reference to the collection's model record.
        model: Box<Expression>,
        /// New records by local key.
        values: BTreeMap<String, Function>,
    },
}

impl Expression {
    pub fn data(value: impl Into<Value>) -> Self {
        Expression::Data(value.into())
    }

    pub fn scope(name: impl Into<String>) -> Self {
        Expression::Scope(name.into())
    }

    pub fn field(name: impl Into<String>, of: Expression) -> Self {
        Expression::Field(name.into(), Box::new(of))
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Expression::Tag(name.into())
    }

    pub fn all_references(model: Expression) -> Self {
        Expression::AllReferences(Box::new(model))
    }

    pub fn slice(value: Expression, offset: usize, length: usize) -> Self {
        Expression::Slice {
            value: Box::new(value),
            offset,
            length,
        }
    }

    pub fn map_list(value: Expression, function: Function) -> Self {
        Expression::MapList {
            value: Box::new(value),
            function,
        }
    }

    pub fn metarialize(reference: Expression) -> Self {
        Expression::Metarialize(Box::new(reference))
    }

    pub fn create_multiple(model: Expression, values: BTreeMap<String, Function>) -> Self {
        Expression::CreateMultiple {
            model: Box::new(model),
            values,
        }
    }

    /// JSON encoding.
    pub fn to_json(&self) -> Json {
        let (name, payload) = match self {
            Expression::Data(value) => ("data", value.to_wire_constructor(&BTreeSet::new())),
            Expression::Scope(name) => ("scope", json!(name)),
            Expression::Field(name, of) => ("field", json!([name, of.to_json()])),
            Expression::Tag(name) => ("tag", json!(name)),
            Expression::AllReferences(model) => ("allReferences", model.to_json()),
            Expression::Slice {
                value,
                offset,
                length,
            } => ("slice", json!([value.to_json(), offset, length])),
            Expression::MapList { value, function } => {
                ("mapList", json!([value.to_json(), function.to_json()]))
            }
            Expression::Metarialize(reference) => ("metarialize", reference.to_json()),
            Expression::CreateMultiple { model, values } => {
                let values: JsonMap<String, Json> = values
                    .iter()
                    .map(|(k, f)| (k.clone(), f.to_json()))
                    .collect();
                ("createMultiple", json!([model.to_json(), values]))
            }
        };
        let mut obj = JsonMap::new();
        obj.insert(name.to_string(), payload);
        Json::Object(obj)
    }
}

/// A function literal.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    /// Parameter names.
    pub params: Vec<String>,
    /// Body expressions; the function returns the value of the last one.
    pub body: Vec<Expression>,
}

impl Function {
    pub fn new<S: Into<String>>(params: impl IntoIterator<Item = S>, body: Vec<Expression>) -> Self {
        Self {
            params: params.into_iter().map(Into::into).collect(),
            body,
        }
    }

    /// One-parameter function with a single body expression.
    pub fn unary(param: impl Into<String>, body: Expression) -> Self {
        Self::new([param.into()], vec![body])
    }

    /// JSON encoding: `{"function": [[params...], [body...]]}`.
    pub fn to_json(&self) -> Json {
        let body: Vec<Json> = self.body.iter().map(Expression::to_json).collect();
        json!({ "function": [self.params, body] })
    }
}

/// A top-level request: a zero-parameter function.
///
/// The response is the single result when the body has one expression, an
/// array of results otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    body: Vec<Expression>,
}

impl Query {
    pub fn new(body: Vec<Expression>) -> Self {
        Self { body }
    }

    /// Query with one body expression.
    pub fn single(expression: Expression) -> Self {
        Self::new(vec![expression])
    }

    pub fn body(&self) -> &[Expression] {
        &self.body
    }

    pub fn to_json(&self) -> Json {
        Function::new(Vec::<String>::new(), self.body.clone()).to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PLACEHOLDER_SCOPE;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_page_query_json() {
        let query = Query::single(Expression::map_list(
            Expression::slice(
                Expression::all_references(Expression::data(Value::reference("m0", "authors"))),
                1000,
                1000,
            ),
            Function::unary("r", Expression::metarialize(Expression::scope("r"))),
        ));
        assert_eq!(
            query.to_json(),
            json!({"function": [[], [
                {"mapList": [
                    {"slice": [{"allReferences": {"data": {"ref": ["m0", "authors"]}}}, 1000, 1000]},
                    {"function": [["r"], [{"metarialize": {"scope": "r"}}]]}
                ]}
            ]]})
        );
    }

    #[test]
    fn test_create_multiple_json() {
        let values = [(
            "p1".to_string(),
            Function::unary(
                PLACEHOLDER_SCOPE,
                Expression::data(Value::structure([("author", Value::Placeholder("a1".into()))])),
            ),
        )]
        .into_iter()
        .collect();
        let expr = Expression::create_multiple(
            Expression::data(Value::reference("m0", "posts")),
            values,
        );
        let json = expr.to_json();
        assert_eq!(
            json["createMultiple"][1]["p1"]["function"][1][0]["data"]["struct"]["author"],
            json!({"expr": {"field": ["a1", {"scope": "refs"}]}})
        );
    }

    #[test]
    fn test_field_and_tag_json() {
        let expr = Expression::field("id", Expression::tag("_model"));
        assert_eq!(expr.to_json(), json!({"field": ["id", {"tag": "_model"}]}));
    }
}
