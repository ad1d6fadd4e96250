use fxhash::FxHashMap;

pub type State = Vec<i64>; // discretized observation
pub type Action = usize;
pub type ActionValues = Vec<f64>; // indexed by action
pub type StateMap = FxHashMap<State, ActionValues>;
pub type Trace = Vec<(State, Action)>;
