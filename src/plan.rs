//! Query planner / VM register file contract (spec.md §1/§6): "out of
//! scope, specified only by interface". This module defines the stable
//! shapes an external planner and VM would exchange with the core engine —
//! a plan-node tree describing a [`crate::dbsp`] pipeline, and a register
//! file a VM would drive it with — with no parser, optimizer, or
//! bytecode interpreter implemented here.
//!
//! Grounded on [`crate::dbsp::Aggregate`]'s trait-object-per-operator shape
//! and on [`crate::protocol::Envelope`]'s posture as a boundary contract
//! type owned by this crate but driven by an external caller.

use crate::error::GnitzResult;
use crate::schema::Schema;
use crate::value::Value;

/// A query plan node, naming one step of a [`crate::dbsp`] pipeline over a
/// table. Purely descriptive: building one does not execute anything, and
/// turning a tree of these into running kernel calls is an external
/// planner/VM's job, not this crate's.
#[derive(Debug, Clone)]
pub enum PlanNode {
    /// Reads the current positive contents of a table.
    Source { table_id: u64 },
    Filter { input: Box<PlanNode>, predicate_name: String },
    Map { input: Box<PlanNode>, output_schema: Schema, projection_name: String },
    Join { left: Box<PlanNode>, right: Box<PlanNode>, output_schema: Schema },
    Distinct { input: Box<PlanNode> },
    Reduce { input: Box<PlanNode>, group_columns: Vec<usize>, output_schema: Schema, aggregate_name: String },
}

impl PlanNode {
    /// The schema a VM should expect this node's output rows to carry, where
    /// staticially known from the node itself (source/filter/distinct pass
    /// their input's schema through unchanged).
    pub fn output_schema<'a>(&'a self, source_schema: impl Fn(u64) -> &'a Schema) -> &'a Schema {
        match self {
            PlanNode::Source { table_id } => source_schema(*table_id),
            PlanNode::Filter { input, .. } | PlanNode::Distinct { input } => input.output_schema(source_schema),
            PlanNode::Map { output_schema, .. } | PlanNode::Join { output_schema, .. } | PlanNode::Reduce { output_schema, .. } => {
                output_schema
            }
        }
    }
}

/// Resolves opaque query text into a [`PlanNode`] tree. SQL parsing is a
/// non-goal of the core engine; this trait is the seam an external planner
/// hangs its own parser/optimizer off of.
pub trait Planner {
    fn plan(&self, query: &str) -> GnitzResult<PlanNode>;
}

/// A VM's addressable register file, holding intermediate scalar values
/// while it walks a [`PlanNode`] tree. The core engine neither allocates
/// nor interprets registers; this is only the contract an external VM
/// would implement to exchange values with code that calls into this
/// crate's kernels.
pub trait RegisterFile {
    fn get(&self, register: u32) -> Option<&Value>;
    fn set(&mut self, register: u32, value: Value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, SchemaBuilder};

    fn schema() -> Schema {
        SchemaBuilder::new().pk("id", ColumnType::U64).column("v", ColumnType::I64, false).build().unwrap()
    }

    #[test]
    fn filter_and_distinct_pass_the_source_schema_through() {
        let node = PlanNode::Distinct {
            input: Box::new(PlanNode::Filter { input: Box::new(PlanNode::Source { table_id: 1 }), predicate_name: "nonneg".into() }),
        };
        let schema = schema();
        assert_eq!(node.output_schema(|_| &schema).pk_index(), 0);
    }

    #[test]
    fn map_carries_its_own_output_schema() {
        let out_schema = SchemaBuilder::new().pk("id", ColumnType::U64).build().unwrap();
        let node = PlanNode::Map {
            input: Box::new(PlanNode::Source { table_id: 1 }),
            output_schema: out_schema.clone(),
            projection_name: "just_pk".into(),
        };
        let src = schema();
        assert_eq!(node.output_schema(|_| &src).payload_count(), 0);
    }

    struct VecRegisters(Vec<Option<Value>>);
    impl RegisterFile for VecRegisters {
        fn get(&self, register: u32) -> Option<&Value> {
            self.0.get(register as usize).and_then(|v| v.as_ref())
        }

        fn set(&mut self, register: u32, value: Value) {
            let idx = register as usize;
            if idx >= self.0.len() {
                self.0.resize(idx + 1, None);
            }
            self.0[idx] = Some(value);
        }
    }

    #[test]
    fn register_file_round_trips_a_value() {
        let mut regs = VecRegisters(Vec::new());
        regs.set(3, Value::I64(42));
        assert_eq!(regs.get(3), Some(&Value::I64(42)));
        assert_eq!(regs.get(0), None);
    }
}
