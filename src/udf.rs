//! Scalar UDF catalog contract (spec.md §1/§6): "out of scope, specified
//! only by interface". This module defines the stable trait surface an
//! external UDF catalog/runtime would implement against — registration and
//! invocation shapes only, no catalog storage or expression evaluator.
//!
//! Grounded on [`crate::protocol::Envelope`]'s own posture: a minimal,
//! dependency-free contract type sitting at the boundary of the core engine,
//! not a subsystem the engine drives itself.

use crate::error::GnitzResult;
use crate::schema::ColumnType;
use crate::value::Value;

/// One argument or return slot's declared type, as a scalar function's
/// signature would advertise it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarSignature {
    pub name: &'static str,
    pub arg_types: &'static [ColumnType],
    pub return_type: ColumnType,
}

/// A single scalar function an external catalog makes available to query
/// plans. Implementations own whatever registration/lookup machinery the
/// catalog needs; this crate only needs to be able to call one.
pub trait ScalarUdf {
    fn signature(&self) -> ScalarSignature;

    /// Evaluates the function over one row's worth of already-typed
    /// argument values. `args.len()` is guaranteed by the caller to match
    /// `signature().arg_types.len()`.
    fn call(&self, args: &[Value]) -> GnitzResult<Value>;
}

/// Looks up registered scalar functions by name. An external adapter
/// backs this with whatever catalog storage it likes (in-memory map, file,
/// RPC call to a separate process); this crate only consumes the trait.
pub trait UdfCatalog {
    fn lookup(&self, name: &str) -> Option<&dyn ScalarUdf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Double;
    impl ScalarUdf for Double {
        fn signature(&self) -> ScalarSignature {
            ScalarSignature { name: "double", arg_types: &[ColumnType::I64], return_type: ColumnType::I64 }
        }

        fn call(&self, args: &[Value]) -> GnitzResult<Value> {
            match args {
                [Value::I64(v)] => Ok(Value::I64(v * 2)),
                _ => Err(crate::error::GnitzError::layout("double() expects a single i64 argument")),
            }
        }
    }

    struct OneFunctionCatalog(Double);
    impl UdfCatalog for OneFunctionCatalog {
        fn lookup(&self, name: &str) -> Option<&dyn ScalarUdf> {
            (name == "double").then_some(&self.0 as &dyn ScalarUdf)
        }
    }

    #[test]
    fn catalog_dispatches_a_registered_function_by_name() {
        let catalog = OneFunctionCatalog(Double);
        let f = catalog.lookup("double").unwrap();
        assert_eq!(f.call(&[Value::I64(21)]).unwrap(), Value::I64(42));
    }

    #[test]
    fn unknown_name_misses() {
        let catalog = OneFunctionCatalog(Double);
        assert!(catalog.lookup("triple").is_none());
    }
}
