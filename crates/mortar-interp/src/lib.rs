pub mod interp;

pub use interp::{
    Command, CommandArguments, Interpreter, InterpreterOptions, NullSystemInspector,
    SystemInspector, MATCH_VARIABLE_PREFIX, RECURSION_DEPTH_VARIABLE,
};
