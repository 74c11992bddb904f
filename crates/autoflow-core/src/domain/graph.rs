//! Workflow graph: an arena of steps plus directed, optionally labelled
//! connections.
//!
//! Every mutation validates the graph invariants before it changes anything:
//! endpoints exist, no self-loops, branch labels only leave conditions and the
//! graph stays acyclic. Edits can be applied to a copy through
//! [`Graph::apply`], leaving the receiver untouched when a command is
//! rejected.

use crate::domain::step::{Step, StepId, StepKind};
use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Directed edge between two steps of the same workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Source step
    pub from: StepId,

    /// Target step
    pub to: StepId,

    /// Outcome of the source condition this edge is taken on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<bool>,
}

impl Connection {
    /// Create an unlabelled connection
    pub fn new(from: impl Into<StepId>, to: impl Into<StepId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            branch: None,
        }
    }

    /// Create a connection taken only on the given condition outcome
    pub fn branch(from: impl Into<StepId>, to: impl Into<StepId>, branch: bool) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            branch: Some(branch),
        }
    }
}

/// A validated edit to a graph
#[derive(Debug, Clone, PartialEq)]
pub enum GraphCommand {
    /// Append a step
    AddStep(Step),
    /// Remove a step and every connection touching it
    RemoveStep(StepId),
    /// Add a connection, replacing the label of an existing pair
    AddConnection {
        /// Source step
        from: StepId,
        /// Target step
        to: StepId,
        /// Optional branch label
        branch: Option<bool>,
    },
    /// Remove a connection if present
    RemoveConnection {
        /// Source step
        from: StepId,
        /// Target step
        to: StepId,
    },
}

/// Steps and connections of one workflow
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    steps: Vec<Step>,
    index: HashMap<StepId, usize>,
    connections: Vec<Connection>,
}

impl Graph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from parts, checking every invariant
    ///
    /// Unlike an edit, a repeated `(from, to)` pair is rejected rather than
    /// relabelled, so no stored connection is lost on load.
    pub fn from_parts(steps: Vec<Step>, connections: Vec<Connection>) -> Result<Self, CoreError> {
        let mut graph = Graph::new();
        for step in steps {
            graph.add_step(step)?;
        }
        for connection in connections {
            if graph.has_connection(&connection.from, &connection.to) {
                return Err(duplicate_connection(&connection.from, &connection.to));
            }
            graph.add_connection_labelled(connection.from, connection.to, connection.branch)?;
        }
        Ok(graph)
    }

    /// Whether the connection `from -> to` exists
    pub fn has_connection(&self, from: &StepId, to: &StepId) -> bool {
        self.connections
            .iter()
            .any(|c| &c.from == from && &c.to == to)
    }

    /// Split the graph back into its parts
    pub fn into_parts(self) -> (Vec<Step>, Vec<Connection>) {
        (self.steps, self.connections)
    }

    /// Append a step
    pub fn add_step(&mut self, step: Step) -> Result<(), CoreError> {
        if self.index.contains_key(&step.id) {
            return Err(CoreError::DuplicateStep(step.id.0));
        }
        self.index.insert(step.id.clone(), self.steps.len());
        self.steps.push(step);
        Ok(())
    }

    /// Remove a step and every connection whose source or target it is
    pub fn remove_step(&mut self, id: &StepId) -> Result<Step, CoreError> {
        let position = self
            .index
            .get(id)
            .copied()
            .ok_or_else(|| CoreError::StepNotFound(id.0.clone()))?;

        let step = self.steps.remove(position);
        self.connections.retain(|c| &c.from != id && &c.to != id);
        self.reindex();
        Ok(step)
    }

    /// Add an unlabelled connection
    pub fn add_connection(&mut self, from: StepId, to: StepId) -> Result<(), CoreError> {
        self.add_connection_labelled(from, to, None)
    }

    /// Add a connection taken only on the given outcome of the source condition
    pub fn add_branch_connection(
        &mut self,
        from: StepId,
        to: StepId,
        branch: bool,
    ) -> Result<(), CoreError> {
        self.add_connection_labelled(from, to, Some(branch))
    }

    fn add_connection_labelled(
        &mut self,
        from: StepId,
        to: StepId,
        branch: Option<bool>,
    ) -> Result<(), CoreError> {
        let source = self
            .step(&from)
            .ok_or_else(|| CoreError::InvalidEndpoint(from.0.clone()))?;
        if !self.index.contains_key(&to) {
            return Err(CoreError::InvalidEndpoint(to.0));
        }
        if from == to {
            return Err(CoreError::SelfLoop(from.0));
        }
        if branch.is_some() && source.kind() != StepKind::Condition {
            return Err(CoreError::InvalidBranch(from.0));
        }

        if let Some(existing) = self
            .connections
            .iter_mut()
            .find(|c| c.from == from && c.to == to)
        {
            existing.branch = branch;
            return Ok(());
        }

        if self.path_exists(&to, &from) {
            return Err(CoreError::CycleDetected {
                from: from.0,
                to: to.0,
            });
        }

        self.connections.push(Connection { from, to, branch });
        Ok(())
    }

    /// Remove the connection `from -> to`, reporting whether one existed
    pub fn remove_connection(&mut self, from: &StepId, to: &StepId) -> bool {
        let before = self.connections.len();
        self.connections.retain(|c| !(&c.from == from && &c.to == to));
        self.connections.len() != before
    }

    /// Apply a command to a copy of this graph
    pub fn apply(&self, command: GraphCommand) -> Result<Graph, CoreError> {
        let mut next = self.clone();
        match command {
            GraphCommand::AddStep(step) => next.add_step(step)?,
            GraphCommand::RemoveStep(id) => {
                next.remove_step(&id)?;
            }
            GraphCommand::AddConnection { from, to, branch } => {
                next.add_connection_labelled(from, to, branch)?
            }
            GraphCommand::RemoveConnection { from, to } => {
                next.remove_connection(&from, &to);
            }
        }
        Ok(next)
    }

    /// Look up a step
    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    /// Whether the step exists
    pub fn contains_step(&self, id: &StepId) -> bool {
        self.index.contains_key(id)
    }

    /// Steps in insertion order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// All connections
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the graph has no steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Connections arriving at `id`
    pub fn inbound<'a>(&'a self, id: &'a StepId) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| &c.to == id)
    }

    /// Connections leaving `id`
    pub fn outbound<'a>(&'a self, id: &'a StepId) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| &c.from == id)
    }

    /// Direct predecessors of `id`
    pub fn predecessors<'a>(&'a self, id: &'a StepId) -> Vec<&'a StepId> {
        self.inbound(id).map(|c| &c.from).collect()
    }

    /// Direct successors of `id`
    pub fn successors<'a>(&'a self, id: &'a StepId) -> Vec<&'a StepId> {
        self.outbound(id).map(|c| &c.to).collect()
    }

    /// Trigger steps in insertion order
    pub fn triggers(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.is_trigger())
    }

    /// Non-trigger steps with no inbound connection
    pub fn orphans(&self) -> Vec<&StepId> {
        let targets: HashSet<&StepId> = self.connections.iter().map(|c| &c.to).collect();
        self.steps
            .iter()
            .filter(|s| !s.is_trigger() && !targets.contains(&s.id))
            .map(|s| &s.id)
            .collect()
    }

    /// Steps reachable from at least one trigger, triggers included
    ///
    /// The traversal is breadth-first, seeded with the triggers in insertion
    /// order, and is recomputed each time this is called.
    pub fn reachable_from_triggers(&self) -> Reachable<'_> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        for trigger in self.triggers() {
            if visited.insert(&trigger.id) {
                queue.push_back(&trigger.id);
            }
        }
        Reachable {
            graph: self,
            visited,
            queue,
        }
    }

    /// Whether any path leads from `start` to `target`
    fn path_exists(&self, start: &StepId, target: &StepId) -> bool {
        let mut stack = vec![start];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            stack.extend(self.outbound(current).map(|c| &c.to));
        }
        false
    }

    /// Whether the connections contain a cycle
    pub fn contains_cycle(&self) -> bool {
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        self.steps
            .iter()
            .any(|s| self.is_cyclic(&s.id, &mut visited, &mut on_stack))
    }

    fn is_cyclic<'a>(
        &'a self,
        id: &'a StepId,
        visited: &mut HashSet<&'a StepId>,
        on_stack: &mut HashSet<&'a StepId>,
    ) -> bool {
        if on_stack.contains(id) {
            return true;
        }
        if !visited.insert(id) {
            return false;
        }
        on_stack.insert(id);
        for next in self.outbound(id).map(|c| &c.to) {
            if self.is_cyclic(next, visited, on_stack) {
                return true;
            }
        }
        on_stack.remove(id);
        false
    }

    /// Topological order of the reachable subgraph
    ///
    /// Ties are broken by insertion index, so the same graph always yields
    /// the same order.
    pub fn execution_order(&self) -> Vec<StepId> {
        let reachable: HashSet<&StepId> = self.reachable_from_triggers().map(|s| &s.id).collect();

        let mut in_degree: HashMap<&StepId, usize> =
            reachable.iter().map(|&id| (id, 0)).collect();
        for connection in &self.connections {
            if reachable.contains(&connection.from) {
                if let Some(degree) = in_degree.get_mut(&connection.to) {
                    *degree += 1;
                }
            }
        }

        // Keyed by insertion index so the smallest ready step pops first
        let mut ready: BTreeMap<usize, &StepId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(&id, _)| (self.index[id], id))
            .collect();

        let mut order = Vec::with_capacity(reachable.len());
        while let Some((_, id)) = ready.pop_first() {
            order.push(id.clone());
            for next in self.outbound(id).map(|c| &c.to) {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(self.index[next], next);
                    }
                }
            }
        }
        order
    }

    /// Check every graph invariant
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut pairs = HashSet::new();
        for connection in &self.connections {
            let source = self
                .step(&connection.from)
                .ok_or_else(|| CoreError::InvalidEndpoint(connection.from.0.clone()))?;
            if !self.contains_step(&connection.to) {
                return Err(CoreError::InvalidEndpoint(connection.to.0.clone()));
            }
            if connection.from == connection.to {
                return Err(CoreError::SelfLoop(connection.from.0.clone()));
            }
            if connection.branch.is_some() && source.kind() != StepKind::Condition {
                return Err(CoreError::InvalidBranch(connection.from.0.clone()));
            }
            if !pairs.insert((&connection.from, &connection.to)) {
                return Err(duplicate_connection(&connection.from, &connection.to));
            }
        }

        if self.contains_cycle() {
            if let Some(connection) = self
                .connections
                .iter()
                .find(|c| self.path_exists(&c.to, &c.from))
            {
                return Err(CoreError::CycleDetected {
                    from: connection.from.0.clone(),
                    to: connection.to.0.clone(),
                });
            }
        }
        Ok(())
    }

    fn reindex(&mut self) {
        self.index = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
    }
}

/// Lazy breadth-first walk over the steps reachable from the triggers
pub struct Reachable<'a> {
    graph: &'a Graph,
    visited: HashSet<&'a StepId>,
    queue: VecDeque<&'a StepId>,
}

impl<'a> Iterator for Reachable<'a> {
    type Item = &'a Step;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.queue.pop_front()?;
        for next in self.graph.outbound(id).map(|c| &c.to) {
            if self.visited.insert(next) {
                self.queue.push_back(next);
            }
        }
        self.graph.step(id)
    }
}

fn duplicate_connection(from: &StepId, to: &StepId) -> CoreError {
    CoreError::ValidationError(format!("Duplicate connection {} -> {}", from, to))
}
