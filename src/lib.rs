//! Incremental batch-processing engine for tabular data pipelines.
//!
//! Tables are tracked by row-level content hash and four lifecycle
//! timestamps ([`row_meta`]); a step's transform keys and its own
//! success/failure history ([`transform_meta`]) feed the [`planner`], which
//! produces the batched, priority-ordered set of keys that need
//! (re)processing. The [`executor`] runs each batch through fetch →
//! transform-or-delete → store → advance-meta, and the [`driver`] runs a
//! list of steps either as a full refresh or by draining a change list to a
//! fixed point.
//!
//! ```
//! use trickle_pipe::catalog::{Catalog, DataTable};
//! use trickle_pipe::dataframe::DataFrame;
//! use trickle_pipe::driver::Driver;
//! use trickle_pipe::executor::SingleThreadExecutor;
//! use trickle_pipe::step::{BatchTransformStep, BatchTransformFn, Step, TransformResult};
//! use trickle_pipe::store::MemoryTableStore;
//! use trickle_pipe::value::{Column, Value};
//!
//! let mut catalog = Catalog::new();
//! catalog.register(DataTable::new(
//!     "orders",
//!     Box::new(MemoryTableStore::new("orders", vec![Column::text("id")], vec!["amount".to_string()])),
//! ));
//! catalog.register(DataTable::new(
//!     "orders_doubled",
//!     Box::new(MemoryTableStore::new("orders_doubled", vec![Column::text("id")], vec!["amount".to_string()])),
//! ));
//!
//! catalog
//!     .get("orders")
//!     .unwrap()
//!     .store_chunk(
//!         &DataFrame::from_rows(["id", "amount"], vec![vec![Value::Text("o1".into()), Value::Int(10)]]),
//!         None,
//!         1,
//!     )
//!     .unwrap();
//!
//! let double: Box<BatchTransformFn> = Box::new(|inputs| {
//!     let df = &inputs[0];
//!     let rows = df
//!         .rows()
//!         .map(|row| {
//!             let doubled = match &row[1] {
//!                 Value::Int(n) => Value::Int(n * 2),
//!                 other => other.clone(),
//!             };
//!             vec![row[0].clone(), doubled]
//!         })
//!         .collect();
//!     Ok(TransformResult::Single(DataFrame::from_rows(df.columns().to_vec(), rows)))
//! });
//!
//! let step: Box<dyn Step> = Box::new(
//!     BatchTransformStep::build(
//!         &catalog,
//!         "double_amount",
//!         vec!["orders".to_string()],
//!         vec!["orders_doubled".to_string()],
//!         None,
//!         100,
//!         vec![],
//!         double,
//!     )
//!     .unwrap(),
//! );
//!
//! let executor = SingleThreadExecutor;
//! Driver::run(&catalog, &[step], &executor, None, 2).unwrap();
//! assert_eq!(
//!     catalog.get("orders_doubled").unwrap().read_rows(None).unwrap().get(0, "amount"),
//!     Some(&Value::Int(20))
//! );
//! ```

pub mod catalog;
pub mod change_list;
pub mod clock;
pub mod dataframe;
pub mod driver;
pub mod error;
pub mod executor;
pub mod hash;
pub mod planner;
pub mod row_meta;
pub mod run_config;
pub mod step;
pub mod store;
pub mod transform_meta;
pub mod value;

pub use catalog::{Catalog, DataTable};
pub use change_list::ChangeList;
pub use dataframe::{DataFrame, IndexFrame};
pub use driver::Driver;
pub use error::{EngineError, ErrorKind, RetryPolicy, RetryState};
pub use executor::{Executor, SingleThreadExecutor};
pub use run_config::RunConfig;
pub use step::{BatchGenerateStep, BatchTransformStep, Step};
pub use store::{MemoryTableStore, TableStore};
pub use value::{Column, ColumnType, Pk, PkValue, Value};
