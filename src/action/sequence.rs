//! Reusable command sequences and the parameter resolution shared by every
//! ordered list of commands.

use super::command::Command;
use super::error::{ActionError, MissingParam, ParamRuleViolationList, Result};
use super::functionoid::Functionoid;
use super::resource::ResourceCore;
use crate::core::ParameterSet;
use crate::gatekeeper::GateKeeper;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// A command together with the namespace its parameters are looked up in.
#[derive(Clone)]
pub(crate) struct Entry {
    pub command: Arc<Command>,
    pub namespace: String,
}

/// Reject commands that belong to another resource (or to none).
pub(crate) fn check_owner(
    core: &Arc<ResourceCore>,
    command: &Command,
    container: &str,
) -> Result<()> {
    match command.owner() {
        Some(owner) if Arc::ptr_eq(owner, core) => Ok(()),
        Some(owner) => Err(ActionError::InvalidResource(format!(
            "Cannot add command '{}' of resource '{}' to '{}' of resource '{}'",
            command.id(),
            owner.path,
            container,
            core.path
        ))),
        None => Err(ActionError::InvalidResource(format!(
            "Cannot add command '{}' to '{}': command is not registered on resource '{}'",
            command.id(),
            container,
            core.path
        ))),
    }
}

/// Look up every registered parameter of every entry in the gatekeeper.
///
/// Returns one parameter set per entry plus the parameters no context provided.
pub(crate) fn resolve_parameters(
    core: &ResourceCore,
    entries: &[Entry],
    gatekeeper: &GateKeeper,
) -> (Vec<ParameterSet>, Vec<MissingParam>) {
    let mut sets = Vec::with_capacity(entries.len());
    let mut missing = Vec::new();

    for entry in entries {
        let command_id = entry.command.id();
        let mut params = ParameterSet::new();
        for name in entry.command.default_params().keys() {
            match gatekeeper.get_parameter(&entry.namespace, command_id, name, &core.contexts) {
                Some(value) => {
                    params.set(name, value.clone());
                }
                None => missing.push(MissingParam {
                    namespace: entry.namespace.clone(),
                    command: command_id.to_string(),
                    parameter: name.to_string(),
                }),
            }
        }
        sets.push(params);
    }

    (sets, missing)
}

/// Validate each entry's resolved parameters against its rules and constraints.
pub(crate) fn find_invalid_parameters(
    entries: &[Entry],
    sets: &[ParameterSet],
) -> Vec<ParamRuleViolationList> {
    entries
        .iter()
        .zip(sets)
        .enumerate()
        .filter_map(|(index, (entry, params))| {
            let merged = entry.command.merge_parameters_with_defaults(params);
            let violations = entry.command.check_rules_and_constraints(&merged);
            if violations.is_empty() {
                return None;
            }
            Some(ParamRuleViolationList {
                command: entry.command.id().to_string(),
                command_index: index,
                parameters: merged
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect(),
                violations,
            })
        })
        .collect()
}

pub(crate) fn describe_missing(resource: &str, missing: &MissingParam) -> String {
    format!(
        "Could not find value of parameter '{}' for command '{}' \
         in namespace '{}' of resource '{}'",
        missing.parameter, missing.command, missing.namespace, resource
    )
}

pub(crate) fn missing_parameters_error(resource: &str, missing: Vec<MissingParam>) -> ActionError {
    let lines: Vec<String> = missing.iter().map(|m| describe_missing(resource, m)).collect();
    ActionError::ParameterNotFound {
        message: lines.join("\n"),
        missing,
    }
}

pub(crate) fn invalid_parameters_error(
    action: &str,
    violations: Vec<ParamRuleViolationList>,
) -> ActionError {
    let mut message = format!(
        "Parameters for {} command(s) of '{}' failed rules/constraints",
        violations.len(),
        action
    );
    for list in &violations {
        for violation in &list.violations {
            message.push_str(&format!(
                "\n  {} (#{}): {}",
                list.command, list.command_index, violation
            ));
        }
    }
    ActionError::CommandParameterCheckFailed { message, violations }
}

/// Named, append-only list of commands of one resource.
///
/// Sequences do not execute; transitions copy their entries. The namespace
/// used for parameter lookup is the sequence id.
pub struct CommandSequence {
    id: String,
    core: Arc<ResourceCore>,
    entries: RwLock<Vec<Entry>>,
}

impl CommandSequence {
    pub(crate) fn new(
        id: impl Into<String>,
        core: Arc<ResourceCore>,
        first: &Arc<Command>,
    ) -> Result<Self> {
        let sequence = Self {
            id: id.into(),
            core,
            entries: RwLock::new(Vec::new()),
        };
        sequence.then(first)?;
        Ok(sequence)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> String {
        format!("{}.{}", self.core.path, self.id)
    }

    pub fn namespace(&self) -> &str {
        &self.id
    }

    /// Append a command.
    pub fn then(&self, command: &Arc<Command>) -> Result<&Self> {
        check_owner(&self.core, command, &self.id)?;
        self.entries.write().push(Entry {
            command: Arc::clone(command),
            namespace: self.id.clone(),
        });
        Ok(self)
    }

    pub fn commands(&self) -> Vec<Arc<Command>> {
        self.entries.read().iter().map(|e| Arc::clone(&e.command)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub(crate) fn core(&self) -> &Arc<ResourceCore> {
        &self.core
    }

    pub(crate) fn entries(&self) -> Vec<Entry> {
        self.entries.read().clone()
    }

    pub fn check_for_missing_parameters(&self, gatekeeper: &GateKeeper) -> Vec<MissingParam> {
        resolve_parameters(&self.core, &self.entries(), gatekeeper).1
    }

    pub fn check_for_invalid_parameters(
        &self,
        gatekeeper: &GateKeeper,
    ) -> Vec<ParamRuleViolationList> {
        let entries = self.entries();
        let (sets, _) = resolve_parameters(&self.core, &entries, gatekeeper);
        find_invalid_parameters(&entries, &sets)
    }
}

impl fmt::Debug for CommandSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.commands().iter().map(|c| c.id().to_string()).collect();
        f.debug_struct("CommandSequence")
            .field("path", &self.path())
            .field("commands", &ids)
            .finish()
    }
}
