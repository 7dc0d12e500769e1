pub mod ast;
pub mod call_tree;
pub mod cfg;
pub mod config;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod stack;
pub mod syntax_tree;
pub mod token;

pub use call_tree::{CallTreeNode, build_call_tree};
pub use cfg::{ControlFlowGraph, build_cfg, mark_executed_cfg_nodes};
pub use config::InterpreterOptions;
pub use error::SyntaxError;
pub use interpreter::{ErrorInfo, ExecutionState, Interpreter, execute};
pub use syntax_tree::{TreeNode, mark_executing_nodes, parse_ast};
