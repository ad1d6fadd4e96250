//! Python bindings over gym-style environments.
//!
//! `env.step(a)` must return `(obs, reward, done, info)`; `info` may carry
//! `"crm-experience"` as a list of `(s, a, r, s', done)` and `"rs-reward"`.

use pyo3::exceptions::{PyRuntimeError, PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList, PyString, PyTuple};

use crate::config::LearnConfig;
use crate::counterexamples::collect_counterexamples;
use crate::env::{BatchEnvironment, BatchStep, Environment, Experience, Step, StepInfo};
use crate::error::{Error, Result};
use crate::q_table::QTable;
use crate::train::{self, seeded_rng};
use crate::types::{Action, State};

impl From<Error> for PyErr {
    fn from(err: Error) -> PyErr {
        match err {
            // Hand back whatever the environment raised
            Error::Environment(source) => match source.downcast::<PyErr>() {
                Ok(py_err) => *py_err,
                Err(source) => PyRuntimeError::new_err(source.to_string()),
            },
            other => PyRuntimeError::new_err(other.to_string()),
        }
    }
}

fn state_from_py(obj: &Bound<'_, PyAny>) -> PyResult<State> {
    let mut state = State::new();
    flatten_into(obj, &mut state)?;
    Ok(state)
}

fn flatten_into(obj: &Bound<'_, PyAny>, out: &mut State) -> PyResult<()> {
    if let Ok(v) = obj.extract::<i64>() {
        out.push(v);
        return Ok(());
    }
    if obj.is_instance_of::<PyString>() {
        return Err(PyTypeError::new_err("observations must be discrete numbers"));
    }
    for item in obj.try_iter()? {
        flatten_into(&item?, out)?;
    }
    Ok(())
}

fn floats(obj: &Bound<'_, PyAny>) -> PyResult<Vec<f64>> {
    if let Ok(v) = obj.extract::<f64>() {
        return Ok(vec![v]);
    }
    obj.try_iter()?.map(|item| item?.extract()).collect()
}

fn bools(obj: &Bound<'_, PyAny>) -> PyResult<Vec<bool>> {
    if let Ok(v) = obj.extract::<bool>() {
        return Ok(vec![v]);
    }
    obj.try_iter()?.map(|item| item?.extract()).collect()
}

fn num_actions(env: &Bound<'_, PyAny>) -> PyResult<usize> {
    env.getattr("action_space")?.getattr("n")?.extract()
}

fn info_from_py(info: &Bound<'_, PyAny>) -> PyResult<StepInfo> {
    let mut step_info = StepInfo::default();
    let Ok(info) = info.downcast::<PyDict>() else {
        return Ok(step_info);
    };

    if let Some(raw) = info.get_item("crm-experience")? {
        let mut experiences = Vec::new();
        for item in raw.try_iter()? {
            let (s, a, r, sn, done): (Bound<'_, PyAny>, Action, f64, Bound<'_, PyAny>, bool) =
                item?.extract()?;
            experiences.push(Experience {
                state: state_from_py(&s)?,
                action: a,
                reward: r,
                next_state: state_from_py(&sn)?,
                done,
            });
        }
        step_info.crm_experience = Some(experiences);
    }
    if let Some(raw) = info.get_item("rs-reward")? {
        step_info.rs_reward = Some(raw.extract()?);
    }
    Ok(step_info)
}

struct PyEnv<'py> {
    env: Bound<'py, PyAny>,
    num_actions: usize,
}

impl<'py> PyEnv<'py> {
    fn new(env: Bound<'py, PyAny>) -> PyResult<Self> {
        let num_actions = num_actions(&env)?;
        Ok(PyEnv { env, num_actions })
    }

    fn py_step(&self, action: Action) -> PyResult<Step> {
        let (obs, reward, done, info): (Bound<'py, PyAny>, f64, bool, Bound<'py, PyAny>) =
            self.env.call_method1("step", (action,))?.extract()?;
        Ok(Step {
            observation: state_from_py(&obs)?,
            reward,
            done,
            info: info_from_py(&info)?,
        })
    }
}

impl Environment for PyEnv<'_> {
    fn reset(&mut self) -> Result<State> {
        let obs = self.env.call_method0("reset").map_err(Error::environment)?;
        state_from_py(&obs).map_err(Error::environment)
    }

    fn step(&mut self, action: Action) -> Result<Step> {
        self.py_step(action).map_err(Error::environment)
    }

    fn num_actions(&self) -> usize {
        self.num_actions
    }
}

/// Vectorized env: rewards and dones come back as one entry per sub-environment.
struct PyVecEnv<'py> {
    env: Bound<'py, PyAny>,
    num_envs: usize,
    num_actions: usize,
}

impl<'py> PyVecEnv<'py> {
    fn new(env: Bound<'py, PyAny>) -> PyResult<Self> {
        let num_envs = env.getattr("num_envs")?.extract()?;
        let num_actions = num_actions(&env)?;
        Ok(PyVecEnv {
            env,
            num_envs,
            num_actions,
        })
    }

    fn py_step(&self, action: Action) -> PyResult<BatchStep> {
        let (obs, rew, done, _info): (
            Bound<'py, PyAny>,
            Bound<'py, PyAny>,
            Bound<'py, PyAny>,
            Bound<'py, PyAny>,
        ) = self.env.call_method1("step", (action,))?.extract()?;
        Ok(BatchStep {
            observation: state_from_py(&obs)?,
            rewards: floats(&rew)?,
            dones: bools(&done)?,
        })
    }
}

impl BatchEnvironment for PyVecEnv<'_> {
    fn num_envs(&self) -> usize {
        self.num_envs
    }

    fn reset(&mut self) -> Result<State> {
        let obs = self.env.call_method0("reset").map_err(Error::environment)?;
        state_from_py(&obs).map_err(Error::environment)
    }

    fn step(&mut self, action: Action) -> Result<BatchStep> {
        self.py_step(action).map_err(Error::environment)
    }

    fn num_actions(&self) -> usize {
        self.num_actions
    }
}

fn q_table_from_py(
    model: &Bound<'_, PyDict>,
    num_actions: usize,
    initial_value: f64,
) -> PyResult<QTable> {
    let mut q_table = QTable::new(num_actions, initial_value);
    for (state, values) in model.iter() {
        let state = state_from_py(&state)?;
        let mut row = vec![initial_value; num_actions];
        for (action, value) in values.downcast::<PyDict>()?.iter() {
            let action: Action = action.extract()?;
            let slot = row.get_mut(action).ok_or_else(|| {
                PyValueError::new_err(format!(
                    "action {action} out of range for {num_actions} actions"
                ))
            })?;
            *slot = value.extract()?;
        }
        q_table.insert(state, row)?;
    }
    Ok(q_table)
}

/// Writes every row of `q_table` into `dict`, reusing row dicts already there.
fn write_q_table(dict: &Bound<'_, PyDict>, q_table: &QTable) -> PyResult<()> {
    let py = dict.py();
    for (state, values) in q_table.iter() {
        let key = PyTuple::new(py, state.iter().copied())?;
        let row = match dict.get_item(&key)? {
            Some(existing) => existing.downcast_into::<PyDict>()?,
            None => {
                let row = PyDict::new(py);
                dict.set_item(&key, &row)?;
                row
            }
        };
        for (action, value) in values.iter().enumerate() {
            row.set_item(action, *value)?;
        }
    }
    Ok(())
}

/// Train a tabular Q-learning model, returned as `{state tuple: {action: value}}`.
///
/// When `model` is given it is trained in place and returned.
#[pyfunction]
#[pyo3(signature = (
    env,
    lr = 0.1,
    total_timesteps = 100_000,
    epsilon = 0.1,
    print_freq = Some(10_000),
    gamma = 0.9,
    q_init = 2.0,
    use_crm = false,
    use_rs = false,
    seed = None,
    model = None,
))]
#[allow(clippy::too_many_arguments)]
fn learn<'py>(
    py: Python<'py>,
    env: Bound<'py, PyAny>,
    lr: f64,
    total_timesteps: usize,
    epsilon: f64,
    print_freq: Option<usize>,
    gamma: f64,
    q_init: f64,
    use_crm: bool,
    use_rs: bool,
    seed: Option<u64>,
    model: Option<Bound<'py, PyDict>>,
) -> PyResult<Bound<'py, PyDict>> {
    let config = LearnConfig {
        learning_rate: lr,
        total_steps: total_timesteps,
        exploration_rate: epsilon,
        discount_factor: gamma,
        initial_value: q_init,
        use_counterfactual: use_crm,
        use_shaping: use_rs,
        print_freq,
        seed,
    };
    let mut env = PyEnv::new(env)?;
    let initial = model
        .as_ref()
        .map(|m| q_table_from_py(m, env.num_actions, q_init))
        .transpose()?;

    let q_table = train::learn(&mut env, &config, initial)?;
    let out = model.unwrap_or_else(|| PyDict::new(py));
    write_q_table(&out, &q_table)?;
    Ok(out)
}

/// Greedy rollouts under `model`; returns the `[(state, action), ...]` traces that earned nothing.
#[pyfunction]
#[pyo3(signature = (model, env, num_iters, q_init = 2.0, seed = None))]
fn get_policy_counterexamples<'py>(
    py: Python<'py>,
    model: Bound<'py, PyDict>,
    env: Bound<'py, PyAny>,
    num_iters: usize,
    q_init: f64,
    seed: Option<u64>,
) -> PyResult<Bound<'py, PyList>> {
    let mut rng = seeded_rng(seed);
    let q_table = q_table_from_py(&model, num_actions(&env)?, q_init)?;

    let traces = if env.hasattr("num_envs")? {
        collect_counterexamples(&q_table, &mut PyVecEnv::new(env)?, num_iters, &mut rng)?
    } else {
        collect_counterexamples(&q_table, &mut PyEnv::new(env)?, num_iters, &mut rng)?
    };

    let out = PyList::empty(py);
    for trace in traces {
        let steps = PyList::empty(py);
        for (state, action) in trace {
            steps.append((PyTuple::new(py, state)?, action))?;
        }
        out.append(steps)?;
    }
    Ok(out)
}

#[pymodule]
fn crm_qlearning(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(learn, m)?)?;
    m.add_function(wrap_pyfunction!(get_policy_counterexamples, m)?)
}
