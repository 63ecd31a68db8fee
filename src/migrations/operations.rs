//! Built-in document transformations
//!
//! Operations never modify their input; each returns a new document.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Result, StoreError};

/// A stored JSON document as seen by a migration
pub type Document = Map<String, Value>;

/// Fallible value conversion used by transform-style operations
pub type ValueFn = Arc<dyn Fn(&Value) -> std::result::Result<Value, String> + Send + Sync>;
/// Splits one value into the values of several fields
pub type SplitFn = Arc<dyn Fn(&Value) -> std::result::Result<Vec<Value>, String> + Send + Sync>;
/// Joins several field values (missing ones as null) into one value
pub type JoinFn = Arc<dyn Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync>;
/// Document predicate for [`ConditionalTransform`]
pub type ConditionFn = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

/// Wrap a closure as a [`ValueFn`]
pub fn value_fn<F>(f: F) -> ValueFn
where
    F: Fn(&Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Values removed during one migration run, for restoring on rollback.
///
/// Bounded: once `capacity` values are held, further captures are dropped
/// and counted.
#[derive(Debug, Clone)]
pub struct MigrationContext {
    removed: HashMap<(String, String), Value>,
    capacity: usize,
    dropped: usize,
}

impl Default for MigrationContext {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

impl MigrationContext {
    pub const DEFAULT_CAPACITY: usize = 100_000;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            removed: HashMap::new(),
            capacity,
            dropped: 0,
        }
    }

    /// Remember `value` as removed from `field` of document `doc_id`
    pub fn capture(&mut self, field: &str, doc_id: &str, value: Value) -> bool {
        let key = (field.to_string(), doc_id.to_string());
        if self.removed.len() >= self.capacity && !self.removed.contains_key(&key) {
            self.dropped += 1;
            if self.dropped == 1 {
                warn!(field, capacity = self.capacity, "Migration context is full; removed values will not be restorable");
            }
            return false;
        }
        self.removed.insert(key, value);
        true
    }

    pub fn restore(&self, field: &str, doc_id: &str) -> Option<&Value> {
        self.removed.get(&(field.to_string(), doc_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }

    /// Captures refused because the context was full
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

/// A named, pure transformation of one document
pub trait MigrationOperation: Send + Sync {
    /// Short human-readable description, e.g. `rename_field(a -> b)`
    fn describe(&self) -> String;

    fn forward(&self, document: &Document, ctx: &mut MigrationContext) -> Result<Document>;

    fn reverse(&self, _document: &Document, _ctx: &MigrationContext) -> Result<Document> {
        Err(not_reversible(&self.describe()))
    }

    fn is_reversible(&self) -> bool {
        false
    }
}

impl fmt::Debug for dyn MigrationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

fn not_reversible(what: &str) -> StoreError {
    StoreError::migration(format!("{} does not support rollback", what))
}

fn call(what: &str, result: std::result::Result<Value, String>) -> Result<Value> {
    result.map_err(|e| StoreError::migration(format!("{} failed: {}", what, e)))
}

fn document_id(document: &Document) -> Option<&str> {
    document.get("id").and_then(Value::as_str)
}

// =========================================================================
// Field Operations
// =========================================================================

/// Default for [`AddField`]: a fixed value or one produced per document
#[derive(Clone)]
pub enum FieldDefault {
    Value(Value),
    Factory(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl FieldDefault {
    fn produce(&self) -> Value {
        match self {
            FieldDefault::Value(v) => v.clone(),
            FieldDefault::Factory(f) => f(),
        }
    }
}

/// Add a field where it is absent. Reverse removes it.
#[derive(Clone)]
pub struct AddField {
    pub field: String,
    pub default: FieldDefault,
}

impl AddField {
    pub fn new(field: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            default: FieldDefault::Value(default.into()),
        }
    }

    pub fn with_factory<F>(field: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self {
            field: field.into(),
            default: FieldDefault::Factory(Arc::new(factory)),
        }
    }
}

impl MigrationOperation for AddField {
    fn describe(&self) -> String {
        format!("add_field({})", self.field)
    }

    fn forward(&self, document: &Document, _ctx: &mut MigrationContext) -> Result<Document> {
        let mut out = document.clone();
        if !out.contains_key(&self.field) {
            out.insert(self.field.clone(), self.default.produce());
        }
        Ok(out)
    }

    fn reverse(&self, document: &Document, _ctx: &MigrationContext) -> Result<Document> {
        let mut out = document.clone();
        out.remove(&self.field);
        Ok(out)
    }

    fn is_reversible(&self) -> bool {
        true
    }
}

/// Remove a field.
///
/// Removed values are captured in the run's [`MigrationContext`]; reverse
/// restores them, or `fallback` when nothing was captured for a document.
#[derive(Debug, Clone)]
pub struct RemoveField {
    pub field: String,
    pub fallback: Option<Value>,
}

impl RemoveField {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, value: impl Into<Value>) -> Self {
        self.fallback = Some(value.into());
        self
    }
}

impl MigrationOperation for RemoveField {
    fn describe(&self) -> String {
        format!("remove_field({})", self.field)
    }

    fn forward(&self, document: &Document, ctx: &mut MigrationContext) -> Result<Document> {
        let mut out = document.clone();
        if let Some(value) = out.remove(&self.field)
            && let Some(id) = document_id(document)
        {
            ctx.capture(&self.field, id, value);
        }
        Ok(out)
    }

    fn reverse(&self, document: &Document, ctx: &MigrationContext) -> Result<Document> {
        let mut out = document.clone();
        let captured = document_id(document).and_then(|id| ctx.restore(&self.field, id));
        if let Some(value) = captured.or(self.fallback.as_ref()) {
            out.insert(self.field.clone(), value.clone());
        }
        Ok(out)
    }

    fn is_reversible(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct RenameField {
    pub from: String,
    pub to: String,
}

impl RenameField {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

fn rename(document: &Document, from: &str, to: &str) -> Document {
    let mut out = document.clone();
    if let Some(value) = out.remove(from) {
        out.insert(to.to_string(), value);
    }
    out
}

impl MigrationOperation for RenameField {
    fn describe(&self) -> String {
        format!("rename_field({} -> {})", self.from, self.to)
    }

    fn forward(&self, document: &Document, _ctx: &mut MigrationContext) -> Result<Document> {
        Ok(rename(document, &self.from, &self.to))
    }

    fn reverse(&self, document: &Document, _ctx: &MigrationContext) -> Result<Document> {
        Ok(rename(document, &self.to, &self.from))
    }

    fn is_reversible(&self) -> bool {
        true
    }
}

/// Apply a function to a field's value where the field is present
#[derive(Clone)]
pub struct TransformField {
    pub field: String,
    pub forward: ValueFn,
    pub reverse: Option<ValueFn>,
}

impl TransformField {
    pub fn new(field: impl Into<String>, forward: ValueFn) -> Self {
        Self {
            field: field.into(),
            forward,
            reverse: None,
        }
    }

    pub fn with_reverse(mut self, reverse: ValueFn) -> Self {
        self.reverse = Some(reverse);
        self
    }
}

fn map_field(document: &Document, field: &str, what: &str, f: &ValueFn) -> Result<Document> {
    let mut out = document.clone();
    if let Some(value) = out.get_mut(field) {
        *value = call(what, f(value))?;
    }
    Ok(out)
}

impl MigrationOperation for TransformField {
    fn describe(&self) -> String {
        format!("transform_field({})", self.field)
    }

    fn forward(&self, document: &Document, _ctx: &mut MigrationContext) -> Result<Document> {
        map_field(document, &self.field, &self.describe(), &self.forward)
    }

    fn reverse(&self, document: &Document, _ctx: &MigrationContext) -> Result<Document> {
        let reverse = self.reverse.as_ref().ok_or_else(|| {
            StoreError::migration(format!(
                "TransformField for '{}' has no reverse function",
                self.field
            ))
        })?;
        map_field(document, &self.field, &self.describe(), reverse)
    }

    fn is_reversible(&self) -> bool {
        self.reverse.is_some()
    }
}

/// Convert a field's value to another representation
#[derive(Clone)]
pub struct ChangeFieldType {
    pub field: String,
    pub converter: ValueFn,
    pub reverse_converter: Option<ValueFn>,
}

impl ChangeFieldType {
    pub fn new(field: impl Into<String>, converter: ValueFn) -> Self {
        Self {
            field: field.into(),
            converter,
            reverse_converter: None,
        }
    }

    pub fn with_reverse(mut self, reverse_converter: ValueFn) -> Self {
        self.reverse_converter = Some(reverse_converter);
        self
    }
}

impl MigrationOperation for ChangeFieldType {
    fn describe(&self) -> String {
        format!("change_field_type({})", self.field)
    }

    fn forward(&self, document: &Document, _ctx: &mut MigrationContext) -> Result<Document> {
        map_field(document, &self.field, &self.describe(), &self.converter)
    }

    fn reverse(&self, document: &Document, _ctx: &MigrationContext) -> Result<Document> {
        let reverse = self.reverse_converter.as_ref().ok_or_else(|| {
            StoreError::migration(format!(
                "ChangeFieldType for '{}' has no reverse converter",
                self.field
            ))
        })?;
        map_field(document, &self.field, &self.describe(), reverse)
    }

    fn is_reversible(&self) -> bool {
        self.reverse_converter.is_some()
    }
}

/// Split one field into several
#[derive(Clone)]
pub struct SplitField {
    pub source: String,
    pub targets: Vec<String>,
    pub splitter: SplitFn,
    pub joiner: Option<JoinFn>,
}

impl SplitField {
    pub fn new(source: impl Into<String>, targets: Vec<String>, splitter: SplitFn) -> Self {
        Self {
            source: source.into(),
            targets,
            splitter,
            joiner: None,
        }
    }

    pub fn with_joiner(mut self, joiner: JoinFn) -> Self {
        self.joiner = Some(joiner);
        self
    }
}

fn scatter(out: &mut Document, fields: &[String], values: Vec<Value>) {
    for (field, value) in fields.iter().zip(values) {
        out.insert(field.clone(), value);
    }
}

fn gather(out: &mut Document, fields: &[String]) -> Vec<Value> {
    fields
        .iter()
        .map(|f| out.remove(f).unwrap_or(Value::Null))
        .collect()
}

impl MigrationOperation for SplitField {
    fn describe(&self) -> String {
        format!("split_field({} -> {})", self.source, self.targets.join(", "))
    }

    fn forward(&self, document: &Document, _ctx: &mut MigrationContext) -> Result<Document> {
        let mut out = document.clone();
        if let Some(value) = out.remove(&self.source) {
            let parts = (self.splitter)(&value)
                .map_err(|e| StoreError::migration(format!("{} failed: {}", self.describe(), e)))?;
            scatter(&mut out, &self.targets, parts);
        }
        Ok(out)
    }

    fn reverse(&self, document: &Document, _ctx: &MigrationContext) -> Result<Document> {
        let joiner = self.joiner.as_ref().ok_or_else(|| {
            StoreError::migration(format!(
                "SplitField from '{}' has no joiner function",
                self.source
            ))
        })?;
        let mut out = document.clone();
        let values = gather(&mut out, &self.targets);
        out.insert(self.source.clone(), call(&self.describe(), joiner(&values))?);
        Ok(out)
    }

    fn is_reversible(&self) -> bool {
        self.joiner.is_some()
    }
}

/// Merge several fields into one
#[derive(Clone)]
pub struct MergeFields {
    pub sources: Vec<String>,
    pub target: String,
    pub merger: JoinFn,
    pub splitter: Option<SplitFn>,
}

impl MergeFields {
    pub fn new(sources: Vec<String>, target: impl Into<String>, merger: JoinFn) -> Self {
        Self {
            sources,
            target: target.into(),
            merger,
            splitter: None,
        }
    }

    pub fn with_splitter(mut self, splitter: SplitFn) -> Self {
        self.splitter = Some(splitter);
        self
    }
}

impl MigrationOperation for MergeFields {
    fn describe(&self) -> String {
        format!("merge_fields({} -> {})", self.sources.join(", "), self.target)
    }

    fn forward(&self, document: &Document, _ctx: &mut MigrationContext) -> Result<Document> {
        let mut out = document.clone();
        let values = gather(&mut out, &self.sources);
        out.insert(self.target.clone(), call(&self.describe(), (self.merger)(&values))?);
        Ok(out)
    }

    fn reverse(&self, document: &Document, _ctx: &MigrationContext) -> Result<Document> {
        let splitter = self.splitter.as_ref().ok_or_else(|| {
            StoreError::migration(format!(
                "MergeFields to '{}' has no splitter function",
                self.target
            ))
        })?;
        let mut out = document.clone();
        if let Some(value) = out.remove(&self.target) {
            let parts = splitter(&value)
                .map_err(|e| StoreError::migration(format!("{} failed: {}", self.describe(), e)))?;
            scatter(&mut out, &self.sources, parts);
        }
        Ok(out)
    }

    fn is_reversible(&self) -> bool {
        self.splitter.is_some()
    }
}

/// Apply an operation only to documents matching a predicate
#[derive(Clone)]
pub struct ConditionalTransform {
    pub condition: ConditionFn,
    pub operation: Arc<dyn MigrationOperation>,
}

impl ConditionalTransform {
    pub fn new<F>(condition: F, operation: impl MigrationOperation + 'static) -> Self
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        Self {
            condition: Arc::new(condition),
            operation: Arc::new(operation),
        }
    }
}

impl MigrationOperation for ConditionalTransform {
    fn describe(&self) -> String {
        format!("conditional({})", self.operation.describe())
    }

    fn forward(&self, document: &Document, ctx: &mut MigrationContext) -> Result<Document> {
        if (self.condition)(document) {
            self.operation.forward(document, ctx)
        } else {
            Ok(document.clone())
        }
    }

    fn reverse(&self, document: &Document, ctx: &MigrationContext) -> Result<Document> {
        if (self.condition)(document) {
            self.operation.reverse(document, ctx)
        } else {
            Ok(document.clone())
        }
    }

    fn is_reversible(&self) -> bool {
        self.operation.is_reversible()
    }
}

/// Rename of a model. Documents are unchanged; moving objects to a new
/// prefix is left to the deployment.
#[derive(Debug, Clone)]
pub struct RenameModel {
    pub old_name: String,
    pub new_name: String,
}

impl RenameModel {
    pub fn new(old_name: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self {
            old_name: old_name.into(),
            new_name: new_name.into(),
        }
    }
}

impl MigrationOperation for RenameModel {
    fn describe(&self) -> String {
        format!("rename_model({} -> {})", self.old_name, self.new_name)
    }

    fn forward(&self, document: &Document, _ctx: &mut MigrationContext) -> Result<Document> {
        Ok(document.clone())
    }

    fn reverse(&self, document: &Document, _ctx: &MigrationContext) -> Result<Document> {
        Ok(document.clone())
    }

    fn is_reversible(&self) -> bool {
        true
    }
}
