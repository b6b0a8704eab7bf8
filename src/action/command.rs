//! Commands: one-shot actions with registered, validated parameters.
//!
//! A [`Command`] wraps user code implementing [`CommandCode`]. Before the
//! command is attached to a [`Resource`](super::Resource) its parameters,
//! rules and constraints may be registered; afterwards they are frozen.
//! Each `exec` merges the caller's parameters over the registered defaults,
//! validates the merged set, claims the resource and runs the code either
//! on the resource's worker pool or on the calling thread.

use super::error::{ActionError, ParamRuleViolation, ParamRuleViolationList, Result};
use super::functionoid::{ActionId, ActionKind, ExecMode, Functionoid, Progress, Tracker};
use super::guard::BusyGuard;
use super::pool::{panic_message, Dispatch, PoolError};
use super::resource::ResourceCore;
use super::status::RunningAction;
use crate::core::{
    Constraint, ErasedRule, FunctionoidState, Parameter, ParameterSet, ReadOnlyParameterSet,
    Rule, State, TerminalState, TypedValue,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

/// Failure reported by command code instead of a terminal state.
///
/// Any `std::error::Error` converts into an `ExecutionFailure` with `?`;
/// the kind is the error's type name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionFailure {
    kind: String,
    message: String,
}

impl ExecutionFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl<E: std::error::Error> From<E> for ExecutionFailure {
    fn from(error: E) -> Self {
        Self::new(std::any::type_name::<E>(), error.to_string())
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// What command code returns.
pub type CodeResult = std::result::Result<TerminalState, ExecutionFailure>;

/// User code run by a command.
///
/// Implemented for every suitable closure.
pub trait CommandCode: Send + Sync + 'static {
    fn code(&self, context: &CommandContext, params: &ReadOnlyParameterSet) -> CodeResult;
}

impl<F> CommandCode for F
where
    F: Fn(&CommandContext, &ReadOnlyParameterSet) -> CodeResult + Send + Sync + 'static,
{
    fn code(&self, context: &CommandContext, params: &ReadOnlyParameterSet) -> CodeResult {
        self(context, params)
    }
}

#[derive(Debug, Default)]
pub(crate) struct CommandState {
    progress: Progress,
    parameters: ReadOnlyParameterSet,
    execution_details: ParameterSet,
    result: Option<TypedValue>,
}

impl AsRef<Progress> for CommandState {
    fn as_ref(&self) -> &Progress {
        &self.progress
    }
}

impl AsMut<Progress> for CommandState {
    fn as_mut(&mut self) -> &mut Progress {
        &mut self.progress
    }
}

/// Handle through which running command code reports progress and results.
pub struct CommandContext {
    path: String,
    core: Arc<ResourceCore>,
    state: Arc<Tracker<CommandState>>,
    generation: u64,
}

impl CommandContext {
    /// Set progress, which must lie in `[0, 1]`.
    pub fn set_progress(&self, progress: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&progress) {
            return Err(ActionError::OutOfRange(format!(
                "Progress {} of command '{}' is outside [0, 1]",
                progress, self.path
            )));
        }
        self.state.lock().progress.progress = progress;
        Ok(())
    }

    pub fn set_progress_with_msg(&self, progress: f32, msg: impl Into<String>) -> Result<()> {
        self.set_progress(progress)?;
        self.set_status_msg(msg);
        Ok(())
    }

    pub fn set_status_msg(&self, msg: impl Into<String>) {
        self.state.lock().progress.status_msg = msg.into();
    }

    pub fn set_result(&self, value: impl Into<TypedValue>) {
        self.state.lock().result = Some(value.into());
    }

    /// Record an extra named value, overwriting any earlier one.
    pub fn add_execution_details(&self, id: impl Into<String>, value: impl Into<TypedValue>) {
        self.state.lock().execution_details.set(id, value);
    }

    pub fn resource_path(&self) -> &str {
        &self.core.path
    }

    /// Driver object of the owning resource, if it is a `T`.
    pub fn driver<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.core.driver::<T>()
    }

    /// Record the final state once the busy guard is released, then wake waiters.
    /// Record the terminal state, then release the resource, then wake waiters.
    fn complete(&self, outcome: CodeResult, guard: BusyGuard) {
        {
            let mut state = self.state.lock();
            match outcome {
                Ok(terminal) => state.progress.finish(terminal.into()),
                Err(failure) => {
                    state.progress.status_msg = format!(
                        "An exception of type '{}' was thrown in Command::code(): {}",
                        failure.kind, failure.message
                    );
                    state.progress.finish(FunctionoidState::Error);
                }
            }
        }
        drop(guard);
        self.state.settle(self.generation);
    }

    fn discard(&self, reason: &PoolError, guard: BusyGuard) {
        {
            let mut state = self.state.lock();
            state.progress.status_msg = format!("Could not schedule command: {}", reason);
            state.progress.finish(FunctionoidState::Error);
        }
        drop(guard);
        self.state.settle(self.generation);
        tracing::warn!(command = %self.path, error = %reason, "Command not run");
    }
}

#[derive(Debug, Default)]
struct Registry {
    defaults: ParameterSet,
    rules: BTreeMap<String, ErasedRule>,
    constraints: BTreeMap<String, Constraint>,
}

/// Immutable view of a command's current or last execution.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CommandSnapshot {
    pub path: String,
    pub id: String,
    pub resource: String,
    pub state: FunctionoidState,
    pub running_time: Duration,
    pub progress: f32,
    pub status_msg: String,
    /// Parameters the execution ran with
    pub parameters: ReadOnlyParameterSet,
    pub execution_details: ReadOnlyParameterSet,
    /// Only present once the execution has finished
    pub result: Option<TypedValue>,
}

impl CommandSnapshot {
    pub fn result_as<T: Parameter>(&self) -> Option<&T> {
        self.result.as_ref()?.get::<T>()
    }
}

/// A leaf action: validated parameters in, terminal state and result out.
///
/// # Example
///
/// ```rust
/// use actionable::action::{Command, ExecMode, Functionoid, ResourceBuilder, WorkerPool};
/// use actionable::config::PoolConfig;
/// use actionable::core::{rules, FunctionoidState, ParameterSet, TerminalState};
///
/// let double = Command::new("double", 0_i64, |ctx, params| {
///     let x = *params.get_as::<i64>("x")?;
///     ctx.set_result(2 * x);
///     Ok(TerminalState::Done)
/// });
/// double.register_parameter("x", 15_i64, rules::greater_than(0_i64)).unwrap();
///
/// let pool = WorkerPool::started(PoolConfig::default()).unwrap();
/// let board = ResourceBuilder::new("board", pool).build();
/// let double = board.register_command(double).unwrap();
///
/// let mut params = ParameterSet::new();
/// params.insert("x", 21_i64).unwrap();
/// double.exec(&params, ExecMode::Sync).unwrap();
///
/// let snapshot = double.status();
/// assert_eq!(snapshot.state, FunctionoidState::Done);
/// assert_eq!(snapshot.result_as::<i64>(), Some(&42));
/// ```
pub struct Command {
    id: String,
    action_id: ActionId,
    default_result: TypedValue,
    code: Arc<dyn CommandCode>,
    registry: RwLock<Registry>,
    owner: OnceLock<Arc<ResourceCore>>,
    state: Arc<Tracker<CommandState>>,
}

impl Command {
    /// Build a command from a closure.
    pub fn new<F>(id: impl Into<String>, default_result: impl Into<TypedValue>, code: F) -> Self
    where
        F: Fn(&CommandContext, &ReadOnlyParameterSet) -> CodeResult + Send + Sync + 'static,
    {
        Self::with_code(id, default_result, code)
    }

    /// Build a command from any [`CommandCode`] implementation.
    pub fn with_code<C: CommandCode>(
        id: impl Into<String>,
        default_result: impl Into<TypedValue>,
        code: C,
    ) -> Self {
        Self {
            id: id.into(),
            action_id: ActionId::new(),
            default_result: default_result.into(),
            code: Arc::new(code),
            registry: RwLock::new(Registry::default()),
            owner: OnceLock::new(),
            state: Arc::new(Tracker::new(CommandState::default())),
        }
    }

    pub(crate) fn attach(&self, core: Arc<ResourceCore>) -> Result<()> {
        let _registry = self.registry.write();
        self.owner.set(core).map_err(|_| {
            ActionError::InvalidResource(format!(
                "Command '{}' is already attached to a resource",
                self.id
            ))
        })
    }

    pub(crate) fn owner(&self) -> Option<&Arc<ResourceCore>> {
        self.owner.get()
    }

    pub fn is_attached(&self) -> bool {
        self.owner.get().is_some()
    }

    fn ensure_unattached(&self, item: &str, error: fn(String) -> ActionError) -> Result<()> {
        if self.is_attached() {
            return Err(error(format!(
                "Cannot register '{}' on command '{}': command is already attached to resource",
                item,
                self.path()
            )));
        }
        Ok(())
    }

    /// Register a parameter with its default value and validation rule.
    pub fn register_parameter<T: Parameter>(
        &self,
        name: &str,
        default: T,
        rule: Rule<T>,
    ) -> Result<()> {
        let mut registry = self.registry.write();
        self.ensure_unattached(name, ActionError::CommandParameterRegistrationFailed)?;
        if registry.defaults.contains(name) {
            return Err(ActionError::CommandParameterRegistrationFailed(format!(
                "Parameter '{}' is already registered on command '{}'",
                name, self.id
            )));
        }

        let outcome = rule.check(&default);
        let default = default.into_value();
        if !outcome.ok {
            let violation = ParamRuleViolation::new(
                vec![name.to_string()],
                rule.description(),
                outcome.details,
            );
            return Err(ActionError::CommandParameterCheckFailed {
                message: format!(
                    "Default value of parameter '{}' of command '{}' is invalid. {}",
                    name, self.id, violation
                ),
                violations: vec![ParamRuleViolationList {
                    command: self.id.clone(),
                    command_index: 0,
                    parameters: vec![(name.to_string(), default.to_string())],
                    violations: vec![violation],
                }],
            });
        }

        registry.defaults.set(name, default);
        registry.rules.insert(name.to_string(), ErasedRule::from(rule));
        Ok(())
    }

    /// Register a parameter validated by its type's default rule.
    pub fn register_parameter_with_default_rule<T: Parameter>(
        &self,
        name: &str,
        default: T,
    ) -> Result<()> {
        self.register_parameter(name, default, T::default_rule())
    }

    /// Remove a parameter no constraint depends on.
    pub fn unregister_parameter(&self, name: &str) -> Result<()> {
        let mut registry = self.registry.write();
        self.ensure_unattached(name, ActionError::CommandParameterRegistrationFailed)?;
        if !registry.defaults.contains(name) {
            return Err(ActionError::CommandParameterRegistrationFailed(format!(
                "Parameter '{}' is not registered on command '{}'",
                name, self.id
            )));
        }
        if let Some((constraint, _)) = registry
            .constraints
            .iter()
            .find(|(_, c)| c.required().contains_key(name))
        {
            return Err(ActionError::CommandParameterRegistrationFailed(format!(
                "Parameter '{}' of command '{}' is required by constraint '{}'",
                name, self.id, constraint
            )));
        }
        registry.defaults.erase(name);
        registry.rules.remove(name);
        Ok(())
    }

    /// Add a multi-parameter constraint; the current defaults must satisfy it.
    pub fn add_constraint(&self, name: &str, constraint: Constraint) -> Result<()> {
        let mut registry = self.registry.write();
        self.ensure_unattached(name, ActionError::CommandConstraintRegistrationFailed)?;
        if registry.constraints.contains_key(name) {
            return Err(ActionError::CommandConstraintRegistrationFailed(format!(
                "Constraint '{}' is already registered on command '{}'",
                name, self.id
            )));
        }

        for (param, kind) in constraint.required() {
            match registry.rules.get(param) {
                None => {
                    return Err(ActionError::CommandConstraintRegistrationFailed(format!(
                        "Constraint '{}' requires parameter '{}', \
                         which is not registered on command '{}'",
                        name, param, self.id
                    )))
                }
                Some(rule) if rule.kind() != *kind => {
                    return Err(ActionError::CommandConstraintRegistrationFailed(format!(
                        "Constraint '{}' requires parameter '{}' of type {}, \
                         but it is registered as {}",
                        name,
                        param,
                        kind,
                        rule.kind()
                    )))
                }
                Some(_) => {}
            }
        }

        let defaults = ReadOnlyParameterSet::from(registry.defaults.clone());
        let outcome = constraint.check(&defaults)?;
        if !outcome.ok {
            return Err(ActionError::CommandConstraintRegistrationFailed(format!(
                "Default parameters of command '{}' do not satisfy constraint '{}' ({}): {}",
                self.id,
                name,
                constraint.description(),
                outcome.details
            )));
        }

        registry.constraints.insert(name.to_string(), constraint);
        Ok(())
    }

    pub fn remove_constraint(&self, name: &str) -> Result<()> {
        let mut registry = self.registry.write();
        self.ensure_unattached(name, ActionError::CommandConstraintRegistrationFailed)?;
        registry.constraints.remove(name).map(|_| ()).ok_or_else(|| {
            ActionError::CommandConstraintRegistrationFailed(format!(
                "Constraint '{}' is not registered on command '{}'",
                name, self.id
            ))
        })
    }

    pub fn default_params(&self) -> ReadOnlyParameterSet {
        ReadOnlyParameterSet::from(self.registry.read().defaults.clone())
    }

    pub fn default_result(&self) -> &TypedValue {
        &self.default_result
    }

    /// Overlay `params` on the registered defaults. The caller's set is not modified.
    pub fn merge_parameters_with_defaults(&self, params: &ParameterSet) -> ReadOnlyParameterSet {
        let mut merged = self.registry.read().defaults.clone();
        for (name, value) in params.iter() {
            merged.set(name, value.clone());
        }
        merged.freeze()
    }

    /// Run every rule and constraint, collecting all violations.
    pub fn check_rules_and_constraints(
        &self,
        params: &ReadOnlyParameterSet,
    ) -> Vec<ParamRuleViolation> {
        let registry = self.registry.read();
        let mut checks: Vec<Validation<(), NonEmptyVec<ParamRuleViolation>>> = Vec::new();

        for (name, value) in params.iter() {
            let check = match registry.rules.get(name) {
                None => Validation::fail(ParamRuleViolation::new(
                    vec![name.to_string()],
                    "registered parameter",
                    format!("Parameter '{}' is not registered on command '{}'", name, self.id),
                )),
                Some(rule) => match rule.check(value) {
                    Ok(outcome) if outcome.ok => Validation::success(()),
                    Ok(outcome) => Validation::fail(ParamRuleViolation::new(
                        vec![name.to_string()],
                        rule.description(),
                        outcome.details,
                    )),
                    Err(found) => Validation::fail(ParamRuleViolation::new(
                        vec![name.to_string()],
                        rule.description(),
                        format!("Value is of type {}, expected {}", found, rule.kind()),
                    )),
                },
            };
            checks.push(check);
        }

        for constraint in registry.constraints.values() {
            let check = match constraint.check(params) {
                Ok(outcome) if outcome.ok => Validation::success(()),
                Ok(outcome) => Validation::fail(ParamRuleViolation::new(
                    constraint.parameter_names(),
                    constraint.description(),
                    outcome.details,
                )),
                Err(err) => Validation::fail(ParamRuleViolation::new(
                    constraint.parameter_names(),
                    constraint.description(),
                    err.to_string(),
                )),
            };
            checks.push(check);
        }

        match Validation::all_vec(checks) {
            Validation::Success(_) => Vec::new(),
            Validation::Failure(errors) => errors.iter().cloned().collect(),
        }
    }

    pub(crate) fn running_action(&self) -> RunningAction {
        RunningAction {
            id: self.action_id,
            kind: ActionKind::Command,
            path: self.path(),
        }
    }

    /// Execute with `params` merged over the defaults.
    ///
    /// Validation and busy errors are returned; failures of the code itself
    /// are recorded on the snapshot.
    pub fn exec(&self, params: &ParameterSet, mode: ExecMode) -> Result<()> {
        self.exec_inner(None, params, mode)
    }

    /// Execute as a nested action of the one holding `guard`.
    pub fn exec_with_guard(
        &self,
        guard: &BusyGuard,
        params: &ParameterSet,
        mode: ExecMode,
    ) -> Result<()> {
        self.exec_inner(Some(guard), params, mode)
    }

    fn exec_inner(
        &self,
        outer: Option<&BusyGuard>,
        params: &ParameterSet,
        mode: ExecMode,
    ) -> Result<()> {
        let core = self
            .owner
            .get()
            .cloned()
            .ok_or_else(|| ActionError::NotAttached(self.id.clone()))?;

        let merged = self.merge_parameters_with_defaults(params);
        let violations = self.check_rules_and_constraints(&merged);
        if !violations.is_empty() {
            return Err(self.check_failed(&merged, violations));
        }

        let guard = BusyGuard::acquire(&core.status, self.running_action(), outer)?;

        let generation = {
            let mut state = self.state.lock();
            state.parameters = merged.clone();
            state.execution_details = ParameterSet::new();
            state.result = Some(self.default_result.clone());
            state.progress.schedule()
        };

        let context = CommandContext {
            path: self.path(),
            core,
            state: Arc::clone(&self.state),
            generation,
        };
        let code = Arc::clone(&self.code);

        match mode {
            ExecMode::Sync => {
                let outcome = run_code(code.as_ref(), &context, &merged);
                context.complete(outcome, guard);
            }
            ExecMode::Async => {
                let pool = Arc::clone(&context.core.pool);
                pool.submit_task(Box::new(move |dispatch| match dispatch {
                    Dispatch::Run => {
                        let outcome = run_code(code.as_ref(), &context, &merged);
                        context.complete(outcome, guard);
                    }
                    Dispatch::Discard(reason) => context.discard(&reason, guard),
                }))?;
            }
        }
        Ok(())
    }

    fn check_failed(
        &self,
        params: &ReadOnlyParameterSet,
        violations: Vec<ParamRuleViolation>,
    ) -> ActionError {
        let details: Vec<String> = violations.iter().map(ToString::to_string).collect();
        let message = format!(
            "{} parameter rule/constraint violation(s) for command '{}': {}",
            violations.len(),
            self.path(),
            details.join("; ")
        );
        tracing::warn!(
            command = %self.path(),
            violations = violations.len(),
            "Rejected command parameters"
        );
        ActionError::CommandParameterCheckFailed {
            message,
            violations: vec![ParamRuleViolationList {
                command: self.id.clone(),
                command_index: 0,
                parameters: params
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect(),
                violations,
            }],
        }
    }
}

/// Run the user code, turning failures and panics into an `Error` outcome.
fn run_code(
    code: &dyn CommandCode,
    context: &CommandContext,
    params: &ReadOnlyParameterSet,
) -> CodeResult {
    context.state.lock().progress.start();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| code.code(context, params)))
        .unwrap_or_else(|payload| {
            Err(ExecutionFailure::new("panic", panic_message(payload.as_ref())))
        });

    if let Err(failure) = &outcome {
        tracing::warn!(
            command = %context.path,
            kind = %failure.kind,
            message = %failure.message,
            "Command code failed"
        );
    }
    outcome
}

impl Functionoid for Command {
    type Snapshot = CommandSnapshot;

    fn id(&self) -> &str {
        &self.id
    }

    fn path(&self) -> String {
        match self.owner.get() {
            Some(core) => format!("{}.{}", core.path, self.id),
            None => self.id.clone(),
        }
    }

    fn action_id(&self) -> ActionId {
        self.action_id
    }

    fn status(&self) -> CommandSnapshot {
        let state = self.state.lock();
        let progress = &state.progress;
        CommandSnapshot {
            path: self.path(),
            id: self.id.clone(),
            resource: self.owner.get().map(|core| core.path.clone()).unwrap_or_default(),
            state: progress.state,
            running_time: progress.running_time(),
            progress: progress.progress,
            status_msg: progress.status_msg.clone(),
            parameters: state.parameters.clone(),
            execution_details: state.execution_details.clone().freeze(),
            result: if progress.state.is_final() {
                state.result.clone()
            } else {
                None
            },
        }
    }

    fn state(&self) -> FunctionoidState {
        self.state.state()
    }

    fn wait(&self, timeout: Duration) -> bool {
        self.state.wait(timeout)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("path", &self.path())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ResourceBuilder, WorkerPool};
    use crate::config::PoolConfig;
    use crate::core::{rules, Match};
    use std::sync::mpsc;
    use std::sync::Mutex;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn board() -> crate::action::Resource {
        let pool = WorkerPool::started(PoolConfig::default().with_workers(2)).unwrap();
        ResourceBuilder::new("board", pool).build()
    }

    fn echo() -> Command {
        let command = Command::new("echo", -1_i64, |ctx, params| {
            let x = *params.get_as::<i64>("x")?;
            ctx.set_progress_with_msg(0.5, "halfway")?;
            ctx.set_result(x);
            Ok(TerminalState::Done)
        });
        command
            .register_parameter("x", 15_i64, rules::greater_than(0_i64))
            .unwrap();
        command
    }

    fn params(x: i64) -> ParameterSet {
        let mut params = ParameterSet::new();
        params.insert("x", x).unwrap();
        params
    }

    #[test]
    fn exec_with_explicit_value_reports_result() {
        let board = board();
        let command = board.register_command(echo()).unwrap();

        command.exec(&params(42), ExecMode::Async).unwrap();
        assert!(command.wait(TIMEOUT));

        let snapshot = command.status();
        assert_eq!(snapshot.state, FunctionoidState::Done);
        assert_eq!(snapshot.progress, 1.0);
        assert_eq!(snapshot.parameters.get_as::<i64>("x").unwrap(), &42);
        assert_eq!(snapshot.result_as::<i64>(), Some(&42));
        assert_eq!(snapshot.status_msg, "halfway");
        assert_eq!(snapshot.path, "board.echo");
    }

    #[test]
    fn unspecified_parameters_take_defaults() {
        let board = board();
        let command = board.register_command(echo()).unwrap();

        command.exec(&ParameterSet::new(), ExecMode::Sync).unwrap();
        assert_eq!(command.status().result_as::<i64>(), Some(&15));
    }

    #[test]
    fn defaults_are_not_changed_by_exec() {
        let board = board();
        let command = board.register_command(echo()).unwrap();

        command.exec(&params(42), ExecMode::Sync).unwrap();
        assert_eq!(command.default_params().get_as::<i64>("x").unwrap(), &15);
        command.exec(&ParameterSet::new(), ExecMode::Sync).unwrap();
        assert_eq!(command.status().result_as::<i64>(), Some(&15));
    }

    #[test]
    fn registration_after_attach_fails() {
        let board = board();
        let command = board.register_command(echo()).unwrap();

        assert!(matches!(
            command.register_parameter("y", 1_i64, rules::none()),
            Err(ActionError::CommandParameterRegistrationFailed(_))
        ));
        let constraint = Constraint::new("x > 1")
            .require::<i64>("x")
            .verify(|p| Match::from(*p.get_as::<i64>("x").unwrap() > 1));
        assert!(matches!(
            command.add_constraint("c", constraint),
            Err(ActionError::CommandConstraintRegistrationFailed(_))
        ));
        assert!(command.unregister_parameter("x").is_err());
    }

    #[test]
    fn duplicate_parameter_fails() {
        let command = echo();
        assert!(matches!(
            command.register_parameter("x", 3_i64, rules::none()),
            Err(ActionError::CommandParameterRegistrationFailed(_))
        ));
    }

    #[test]
    fn default_failing_rule_is_rejected() {
        let command = echo();
        let err = command
            .register_parameter("y", -1_i64, rules::greater_than(0_i64))
            .unwrap_err();
        match err {
            ActionError::CommandParameterCheckFailed { violations, .. } => {
                assert_eq!(violations[0].violations[0].rule, "x > 0");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!command.default_params().contains("y"));
    }

    #[test]
    fn all_violations_are_reported() {
        let board = board();
        let command = Command::new("pair", false, |_, _| Ok(TerminalState::Done));
        command.register_parameter("a", 1_i64, rules::lesser_than(10_i64)).unwrap();
        command.register_parameter("b", 2_i64, rules::lesser_than(10_i64)).unwrap();
        command
            .add_constraint(
                "ordered",
                Constraint::new("a < b")
                    .require::<i64>("a")
                    .require::<i64>("b")
                    .verify(|p| {
                        Match::from(p.get_as::<i64>("a").unwrap() < p.get_as::<i64>("b").unwrap())
                    }),
            )
            .unwrap();
        let command = board.register_command(command).unwrap();

        let mut input = ParameterSet::new();
        input.insert("a", 50_i64).unwrap();
        input.insert("b", 20_i64).unwrap();
        input.insert("c", true).unwrap();

        match command.exec(&input, ExecMode::Sync).unwrap_err() {
            ActionError::CommandParameterCheckFailed { violations, message } => {
                let rules: Vec<&str> = violations[0]
                    .violations
                    .iter()
                    .map(|v| v.rule.as_str())
                    .collect();
                assert_eq!(rules, vec!["x < 10", "x < 10", "registered parameter", "a < b"]);
                assert!(message.starts_with("4 parameter rule/constraint violation(s)"));
                assert_eq!(
                    violations[0].violations[3].to_string(),
                    "Parameters [a, b] failed rule/constraint 'a < b'"
                );
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(command.state(), FunctionoidState::Initial);
    }

    #[test]
    fn constraint_must_hold_for_defaults() {
        let command = Command::new("pair", false, |_, _| Ok(TerminalState::Done));
        command.register_parameter_with_default_rule("a", 5_i64).unwrap();
        let err = command
            .add_constraint(
                "small",
                Constraint::new("a < 3")
                    .require::<i64>("a")
                    .verify(|p| Match::from(*p.get_as::<i64>("a").unwrap() < 3)),
            )
            .unwrap_err();
        assert!(matches!(err, ActionError::CommandConstraintRegistrationFailed(_)));
    }

    #[test]
    fn constraint_requires_registered_parameters() {
        let command = Command::new("pair", false, |_, _| Ok(TerminalState::Done));
        command.register_parameter_with_default_rule("a", 5_i64).unwrap();
        let constraint = Constraint::new("b set")
            .require::<String>("b")
            .verify(|_| Match::pass());
        assert!(command.add_constraint("needs_b", constraint).is_err());

        let wrong_kind = Constraint::new("a text")
            .require::<String>("a")
            .verify(|_| Match::pass());
        assert!(command.add_constraint("kind", wrong_kind).is_err());
    }

    #[test]
    fn parameters_used_by_constraints_cannot_be_unregistered() {
        let command = Command::new("pair", false, |_, _| Ok(TerminalState::Done));
        command.register_parameter_with_default_rule("a", 1_i64).unwrap();
        command
            .add_constraint(
                "positive",
                Constraint::new("a > 0")
                    .require::<i64>("a")
                    .verify(|p| Match::from(*p.get_as::<i64>("a").unwrap() > 0)),
            )
            .unwrap();

        assert!(command.unregister_parameter("a").is_err());
        command.remove_constraint("positive").unwrap();
        command.unregister_parameter("a").unwrap();
        assert!(command.default_params().is_empty());
    }

    #[test]
    fn failure_is_recorded_not_returned() {
        let board = board();
        let command = board
            .register_command(Command::new("parse", 0_i64, |_, _| {
                let value: i64 = "not a number".parse()?;
                Ok(if value > 0 { TerminalState::Done } else { TerminalState::Warning })
            }))
            .unwrap();

        command.exec(&ParameterSet::new(), ExecMode::Async).unwrap();
        assert!(command.wait(TIMEOUT));

        let snapshot = command.status();
        assert_eq!(snapshot.state, FunctionoidState::Error);
        assert!(snapshot.status_msg.starts_with(
            "An exception of type 'core::num::error::ParseIntError' \
             was thrown in Command::code(): "
        ));
        assert_eq!(snapshot.result_as::<i64>(), Some(&0));
    }

    #[test]
    fn panic_is_recorded_as_failure() {
        let board = board();
        let command = board
            .register_command(Command::new("boom", false, |_, _| panic!("wires crossed")))
            .unwrap();

        command.exec(&ParameterSet::new(), ExecMode::Sync).unwrap();
        let snapshot = command.status();
        assert_eq!(snapshot.state, FunctionoidState::Error);
        assert_eq!(
            snapshot.status_msg,
            "An exception of type 'panic' was thrown in Command::code(): wires crossed"
        );
        assert!(!board.status().is_running());
    }

    #[test]
    fn warning_is_terminal_with_full_progress() {
        let board = board();
        let command = board
            .register_command(Command::new("warn", false, |ctx, _| {
                ctx.add_execution_details("temperature", 71.5);
                Ok(TerminalState::Warning)
            }))
            .unwrap();

        command.exec(&ParameterSet::new(), ExecMode::Sync).unwrap();
        let snapshot = command.status();
        assert_eq!(snapshot.state, FunctionoidState::Warning);
        assert_eq!(snapshot.progress, 1.0);
        assert_eq!(
            snapshot.execution_details.get_as::<f64>("temperature").unwrap(),
            &71.5
        );
    }

    #[test]
    fn progress_outside_unit_interval_is_rejected() {
        let board = board();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let command = board
            .register_command(Command::new("progress", false, move |ctx, _| {
                *sink.lock().unwrap() = Some(ctx.set_progress(1.5));
                Ok(TerminalState::Done)
            }))
            .unwrap();

        command.exec(&ParameterSet::new(), ExecMode::Sync).unwrap();
        let outcome = seen.lock().unwrap().take().unwrap();
        assert!(matches!(outcome, Err(ActionError::OutOfRange(_))));
    }

    #[test]
    fn busy_resource_refuses_second_command() {
        let board = board();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let slow = board
            .register_command(Command::new("slow", false, move |_, _| {
                started_tx.send(()).unwrap();
                release_rx.lock().unwrap().recv().unwrap();
                Ok(TerminalState::Done)
            }))
            .unwrap();
        let fast = board.register_command(echo()).unwrap();

        slow.exec(&ParameterSet::new(), ExecMode::Async).unwrap();
        started_rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(slow.state(), FunctionoidState::Running);
        assert!(slow.status().result.is_none());

        let err = fast.exec(&ParameterSet::new(), ExecMode::Sync).unwrap_err();
        assert!(matches!(err, ActionError::ActionableObjectIsBusy(_)));

        release_tx.send(()).unwrap();
        assert!(slow.wait(TIMEOUT));
        fast.exec(&ParameterSet::new(), ExecMode::Sync).unwrap();
    }

    #[test]
    fn unattached_command_cannot_run() {
        let command = echo();
        assert_eq!(
            command.exec(&ParameterSet::new(), ExecMode::Sync).unwrap_err(),
            ActionError::NotAttached("echo".into())
        );
        assert_eq!(command.path(), "echo");
    }

    #[test]
    fn stopped_pool_records_error() {
        let pool = WorkerPool::started(PoolConfig::default().with_workers(1)).unwrap();
        let board = ResourceBuilder::new("board", Arc::clone(&pool)).build();
        let command = board.register_command(echo()).unwrap();
        pool.stop();

        let err = command.exec(&ParameterSet::new(), ExecMode::Async).unwrap_err();
        assert!(matches!(err, ActionError::Pool(_)));
        assert_eq!(command.state(), FunctionoidState::Error);
        assert!(!board.status().is_running());
    }

    #[test]
    fn driver_is_visible_to_code() {
        struct Registers {
            id: u32,
        }
        let pool = WorkerPool::started(PoolConfig::default().with_workers(1)).unwrap();
        let board = ResourceBuilder::new("board", pool)
            .driver(Registers { id: 7 })
            .build();
        let command = board
            .register_command(Command::new("read_id", 0_u64, |ctx, _| {
                let driver = ctx
                    .driver::<Registers>()
                    .ok_or_else(|| ExecutionFailure::new("driver", "missing driver"))?;
                ctx.set_result(u64::from(driver.id));
                Ok(TerminalState::Done)
            }))
            .unwrap();

        command.exec(&ParameterSet::new(), ExecMode::Sync).unwrap();
        assert_eq!(command.status().result_as::<u64>(), Some(&7));
    }

    #[test]
    fn queued_command_settles_when_pool_discards_it() {
        let mut config = PoolConfig::default().with_workers(1);
        config.run_until_queue_empty = false;
        let pool = WorkerPool::started(config).unwrap();
        let board = ResourceBuilder::new("board", Arc::clone(&pool)).build();
        let command = board.register_command(echo()).unwrap();

        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        pool.submit(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
        .unwrap();
        started_rx.recv_timeout(TIMEOUT).unwrap();

        command.exec(&ParameterSet::new(), ExecMode::Async).unwrap();
        assert_eq!(pool.queued(), 1);

        let stopper = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || pool.stop())
        };
        while pool.is_running() {
            std::thread::sleep(Duration::from_millis(1));
        }
        release_tx.send(()).unwrap();
        stopper.join().unwrap();

        assert!(command.wait(TIMEOUT));
        let snapshot = command.status();
        assert_eq!(snapshot.state, FunctionoidState::Error);
        assert_eq!(
            snapshot.status_msg,
            "Could not schedule command: Task discarded by worker pool stop"
        );
        assert!(!board.status().is_running());
    }

    #[test]
    fn finished_state_is_recorded_before_resource_is_released() {
        let board = board();
        let command = board.register_command(echo()).unwrap();

        for _ in 0..20 {
            command.exec(&params(4), ExecMode::Async).unwrap();
            while board.status().is_running() {
                std::thread::yield_now();
            }
            assert_eq!(command.state(), FunctionoidState::Done);
            assert!(command.wait(TIMEOUT));
        }
    }
}
