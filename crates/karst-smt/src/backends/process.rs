use std::collections::HashSet;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};

use indexmap::IndexMap;
use thiserror::Error;

use karst_ir::events::EventStructure;

use crate::backends::smtlib_printer::{quote_symbol, sort_to_smtlib, to_smtlib};
use crate::events::{event_ord_name, event_value_name};
use crate::solver::{AssumptionLabel, SatAnswer, Solver};
use crate::sorts::Sort;
use crate::terms::SmtTerm;

#[derive(Debug, Error)]
pub enum ProcessSolverError {
    #[error("solver I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("solver not found: {0}")]
    NotFound(String),
    #[error("solver error: {0}")]
    Solver(String),
    #[error("failed to parse solver output: {0}")]
    Parse(String),
    #[error("solver could not decide: {0}")]
    Unknown(String),
}

/// Declared interface of the system's symbols: array functions, named
/// elements and constants, with their sorts. Symbols the signature does
/// not name default to `Int` at every position; process variables and
/// event attributes always do.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    fns: IndexMap<String, (Vec<Sort>, Sort)>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_const(mut self, name: impl Into<String>, sort: Sort) -> Self {
        self.fns.insert(name.into(), (Vec::new(), sort));
        self
    }

    pub fn declare_fun(
        mut self,
        name: impl Into<String>,
        args: Vec<Sort>,
        ret: Sort,
    ) -> Self {
        self.fns.insert(name.into(), (args, ret));
        self
    }

    fn lookup(&self, name: &str, arity: usize) -> (Vec<Sort>, Sort) {
        match self.fns.get(name) {
            Some(entry) => entry.clone(),
            None => (vec![Sort::Int; arity], Sort::Int),
        }
    }
}

/// Incremental SMT-LIB2 session over a spawned solver process.
///
/// Labeled assumptions become named assertions; cores come back through
/// `(get-unsat-core)` and are mapped to the originating labels. Symbols
/// are declared lazily, on first appearance in an assumed formula.
pub struct SmtProcessSolver {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr: BufReader<ChildStderr>,
    signature: Signature,
    declared: HashSet<String>,
    labels: Vec<(String, AssumptionLabel)>,
    nonce: usize,
}

impl SmtProcessSolver {
    /// Spawn `z3` in interactive SMT-LIB2 mode.
    pub fn z3() -> Result<Self, ProcessSolverError> {
        Self::with_command("z3", &["-in", "-smt2"])
    }

    /// Spawn `cvc5` in incremental mode.
    pub fn cvc5() -> Result<Self, ProcessSolverError> {
        Self::with_command("cvc5", &["--lang", "smt2", "--incremental"])
    }

    pub fn with_command(cmd: &str, args: &[&str]) -> Result<Self, ProcessSolverError> {
        let mut child = Command::new(cmd)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProcessSolverError::NotFound(format!("{cmd}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProcessSolverError::Solver("failed to capture solver stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessSolverError::Solver("failed to capture solver stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProcessSolverError::Solver("failed to capture solver stderr".into()))?;

        let mut solver = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            stderr: BufReader::new(stderr),
            signature: Signature::default(),
            declared: HashSet::new(),
            labels: Vec::new(),
            nonce: 0,
        };
        solver.send_prelude()?;
        Ok(solver)
    }

    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }

    /// Whether `cmd` resolves to a runnable solver binary; used to gate
    /// solver-dependent tests.
    pub fn available(cmd: &str) -> bool {
        Command::new(cmd)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn send_prelude(&mut self) -> Result<(), ProcessSolverError> {
        self.send_command_no_response("(set-option :produce-unsat-cores true)")?;
        self.send_command_no_response("(set-logic QF_UFLIRA)")?;
        Ok(())
    }

    fn send_command(&mut self, cmd: &str) -> Result<String, ProcessSolverError> {
        writeln!(self.stdin, "{cmd}")?;
        self.stdin.flush()?;

        let mut response = String::new();
        self.stdout.read_line(&mut response)?;
        if response.is_empty() {
            let mut stderr = String::new();
            let _ = self.stderr.read_line(&mut stderr);
            return Err(ProcessSolverError::Solver(format!(
                "no response for command `{cmd}`. stderr: {}",
                stderr.trim()
            )));
        }
        Ok(response.trim_end().to_string())
    }

    fn send_command_no_response(&mut self, cmd: &str) -> Result<(), ProcessSolverError> {
        writeln!(self.stdin, "{cmd}")?;
        self.stdin.flush()?;
        Ok(())
    }

    fn ensure_declared(&mut self, formula: &SmtTerm) -> Result<(), ProcessSolverError> {
        let mut symbols = Vec::new();
        collect_symbols(formula, &mut symbols);
        for (name, arity) in symbols {
            self.declare_symbol(&name, arity)?;
        }
        Ok(())
    }

    fn declare_symbol(&mut self, name: &str, arity: usize) -> Result<(), ProcessSolverError> {
        if !self.declared.insert(name.to_string()) {
            return Ok(());
        }
        let (args, ret) = self.signature.lookup(name, arity);
        let quoted = quote_symbol(name);
        if args.is_empty() {
            self.send_command_no_response(&format!(
                "(declare-const {quoted} {})",
                sort_to_smtlib(&ret)
            ))
        } else {
            let domain: Vec<&str> = args.iter().map(sort_to_smtlib).collect();
            self.send_command_no_response(&format!(
                "(declare-fun {quoted} ({}) {})",
                domain.join(" "),
                sort_to_smtlib(&ret)
            ))
        }
    }

    fn next_assumption_name(&mut self, label: AssumptionLabel) -> String {
        let name = format!("k{label}.{}", self.nonce);
        self.nonce += 1;
        name
    }
}

impl Drop for SmtProcessSolver {
    fn drop(&mut self) {
        let _ = writeln!(self.stdin, "(exit)");
        let _ = self.stdin.flush();
        let _ = self.child.wait();
    }
}

impl Solver for SmtProcessSolver {
    type Error = ProcessSolverError;

    fn clear(&mut self) -> Result<(), Self::Error> {
        self.send_command_no_response("(reset)")?;
        self.send_prelude()?;
        self.declared.clear();
        self.labels.clear();
        Ok(())
    }

    fn assume(
        &mut self,
        label: Option<AssumptionLabel>,
        formula: &SmtTerm,
    ) -> Result<(), Self::Error> {
        self.ensure_declared(formula)?;
        let body = to_smtlib(formula);
        match label {
            Some(label) => {
                let name = self.next_assumption_name(label);
                self.send_command_no_response(&format!("(assert (! {body} :named {name}))"))?;
                self.labels.push((name, label));
            }
            None => {
                self.send_command_no_response(&format!("(assert {body})"))?;
            }
        }
        Ok(())
    }

    fn assume_with_events(
        &mut self,
        events: &EventStructure,
        label: Option<AssumptionLabel>,
        formula: &SmtTerm,
    ) -> Result<(), Self::Error> {
        // Registering the event context pre-declares the per-event
        // attribute symbols, so formulas and later assumptions may refer
        // to events the current formula does not mention.
        for event in events.events() {
            self.declare_symbol(&event_ord_name(event.id), 0)?;
            self.declare_symbol(&event_value_name(event.id), 0)?;
            self.declare_symbol(&format!("_ekind{}", event.id), 0)?;
            self.declare_symbol(&format!("_eloc{}", event.id), 0)?;
        }
        self.assume(label, formula)
    }

    fn check(&mut self) -> Result<SatAnswer, Self::Error> {
        let response = self.send_command("(check-sat)")?;
        match response.as_str() {
            "sat" => Ok(SatAnswer::Sat),
            "unsat" => {
                let core = self.send_command("(get-unsat-core)")?;
                let names = parse_symbol_list(&core);
                let mut labels = Vec::new();
                for name in names {
                    let found = self
                        .labels
                        .iter()
                        .find(|(n, _)| *n == name)
                        .map(|(_, l)| *l);
                    if let Some(label) = found {
                        if !labels.contains(&label) {
                            labels.push(label);
                        }
                    }
                }
                Ok(SatAnswer::Unsat(labels))
            }
            "unknown" => Err(ProcessSolverError::Unknown(
                "solver returned unknown".into(),
            )),
            other => Err(ProcessSolverError::Solver(other.to_string())),
        }
    }
}

fn collect_symbols(term: &SmtTerm, out: &mut Vec<(String, usize)>) {
    match term {
        SmtTerm::App(name, args) => {
            out.push((name.clone(), args.len()));
            for arg in args {
                collect_symbols(arg, out);
            }
        }
        SmtTerm::IntLit(_) | SmtTerm::RealLit(_) | SmtTerm::BoolLit(_) => {}
        SmtTerm::Add(lhs, rhs)
        | SmtTerm::Sub(lhs, rhs)
        | SmtTerm::Eq(lhs, rhs)
        | SmtTerm::Lt(lhs, rhs)
        | SmtTerm::Le(lhs, rhs)
        | SmtTerm::Implies(lhs, rhs) => {
            collect_symbols(lhs, out);
            collect_symbols(rhs, out);
        }
        SmtTerm::And(terms) | SmtTerm::Or(terms) => {
            for t in terms {
                collect_symbols(t, out);
            }
        }
        SmtTerm::Not(inner) => collect_symbols(inner, out),
        SmtTerm::Ite(cond, then, els) => {
            collect_symbols(cond, out);
            collect_symbols(then, out);
            collect_symbols(els, out);
        }
    }
}

/// Parse a parenthesized symbol list such as `(k1.0 k3.2)`, honoring
/// `|quoted symbols|`.
fn parse_symbol_list(response: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut in_quoted_symbol = false;
    for ch in response.trim().chars() {
        match ch {
            '(' | ')' if !in_quoted_symbol => {
                if !buf.is_empty() {
                    out.push(std::mem::take(&mut buf));
                }
            }
            '|' => {
                in_quoted_symbol = !in_quoted_symbol;
                if !buf.is_empty() {
                    out.push(std::mem::take(&mut buf));
                }
            }
            c if c.is_whitespace() && !in_quoted_symbol => {
                if !buf.is_empty() {
                    out.push(std::mem::take(&mut buf));
                }
            }
            other => buf.push(other),
        }
    }
    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_core_symbol_list() {
        assert_eq!(
            parse_symbol_list("(k1.0 k3.2)"),
            vec!["k1.0".to_string(), "k3.2".to_string()]
        );
        assert_eq!(
            parse_symbol_list("(|a b| c)"),
            vec!["a b".to_string(), "c".to_string()]
        );
        assert!(parse_symbol_list("()").is_empty());
    }

    #[test]
    fn collect_symbols_records_arity() {
        let f = SmtTerm::app("flag", vec![SmtTerm::cnst("#1")])
            .eq(SmtTerm::cnst("idle"));
        let mut out = Vec::new();
        collect_symbols(&f, &mut out);
        assert_eq!(
            out,
            vec![
                ("flag".to_string(), 1),
                ("#1".to_string(), 0),
                ("idle".to_string(), 0),
            ]
        );
    }

    #[test]
    fn signature_lookup_defaults_to_int() {
        let sig = Signature::new().declare_fun("flag", vec![Sort::Proc], Sort::Bool);
        assert_eq!(sig.lookup("flag", 1), (vec![Sort::Proc], Sort::Bool));
        assert_eq!(sig.lookup("other", 2), (vec![Sort::Int, Sort::Int], Sort::Int));
    }
}
