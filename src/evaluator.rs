//! The recursive evaluator and its lexical scope chain.
//!
//! Scopes live in a per-session arena and are addressed by id. An
//! [`Evaluator`] is a handle to one of them: a mutable symbol table plus an
//! optional parent. Handles are cheap to clone and pin the scope they point
//! at. A `lambda` closure holds the id of its defining scope and a weak link
//! to the session, so a closure bound in the scope it closes over never keeps
//! the session alive.
//!
//! Unreachable scopes are swept when the outermost `evaluate` returns and
//! whenever the arena has doubled since the last sweep.
//!
//! Lookups fall through to the parent; assignments always land in the local
//! table. The root scope holds the special forms and builtins and, as a last
//! resort, asks the session's [`HostResolver`] for the name.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::function::{Function, IntoFunction, IntoVariadicFunction, Operand};
use crate::host::{FileSystemLoader, HostRegistry, HostResolver, Sandbox, SourceLoader};
use crate::program::{self, ParseConfig, Program, Token};
use crate::value::Value;
use crate::{Error, MAX_EVAL_DEPTH, ParseError, ParseErrorKind, builtinops, forms, stack};

/// Evaluation options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalConfig {
    /// Nested `evaluate` calls allowed before [`Error::StackExhausted`]
    pub max_depth: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            max_depth: MAX_EVAL_DEPTH,
        }
    }
}

type ScopeId = usize;

/// The root scope is the first one a session allocates and is never swept.
const ROOT: ScopeId = 0;

/// Arena size below which growth alone never triggers a sweep.
const MIN_SWEEP: usize = 64;

/// Holds one arena slot alive while any strong reference to it exists.
struct ScopePin(ScopeId);

struct ScopeRecord {
    symbols: HashMap<String, Value>,
    parent: Option<ScopeId>,
    pin: Weak<ScopePin>,
}

/// Every scope of one session, indexed by [`ScopeId`].
struct Arena {
    slots: Vec<Option<ScopeRecord>>,
    free: Vec<ScopeId>,
    live: usize,
    /// `live` at which a new scope triggers a sweep
    threshold: usize,
}

impl Arena {
    fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            threshold: MIN_SWEEP,
        }
    }

    fn insert(&mut self, parent: Option<ScopeId>) -> Rc<ScopePin> {
        let id = self.free.pop().unwrap_or(self.slots.len());
        let pin = Rc::new(ScopePin(id));
        let record = ScopeRecord {
            symbols: HashMap::new(),
            parent,
            pin: Rc::downgrade(&pin),
        };
        match self.slots.get_mut(id) {
            Some(slot) => *slot = Some(record),
            None => self.slots.push(Some(record)),
        }
        self.live += 1;
        pin
    }

    fn record(&self, id: ScopeId) -> Option<&ScopeRecord> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    fn record_mut(&mut self, id: ScopeId) -> Option<&mut ScopeRecord> {
        self.slots.get_mut(id).and_then(Option::as_mut)
    }

    /// A strong pin for `id`, reusing the live one when there is one.
    fn pin(&mut self, id: ScopeId) -> Option<Rc<ScopePin>> {
        let record = self.record_mut(id)?;
        Some(record.pin.upgrade().unwrap_or_else(|| {
            let pin = Rc::new(ScopePin(id));
            record.pin = Rc::downgrade(&pin);
            pin
        }))
    }

    fn lookup(&self, mut id: ScopeId, name: &str) -> Option<Value> {
        loop {
            let record = self.record(id)?;
            if let Some(value) = record.symbols.get(name) {
                return Some(value.clone());
            }
            id = record.parent?;
        }
    }

    /// Free every scope unreachable from the root or from an outside pin.
    ///
    /// A pin is outside when its strong count exceeds the number of closures
    /// stored in arena symbol tables that capture it. The freed records are
    /// returned so the caller drops them after releasing the arena.
    fn sweep(&mut self, session: &Rc<Session>) -> Vec<ScopeRecord> {
        let captured = |value: &Value| match value {
            Value::Function(function) => function.capture()?.id_in(session),
            _ => None,
        };

        let mut internal = vec![0usize; self.slots.len()];
        for record in self.slots.iter().flatten() {
            for id in record.symbols.values().filter_map(captured) {
                if let Some(count) = internal.get_mut(id) {
                    *count += 1;
                }
            }
        }

        let mut pending: Vec<ScopeId> = self
            .slots
            .iter()
            .zip(&internal)
            .enumerate()
            .filter_map(|(id, (slot, count))| {
                let record = slot.as_ref()?;
                (id == ROOT || record.pin.strong_count() > *count).then_some(id)
            })
            .collect();

        let mut marked = vec![false; self.slots.len()];
        while let Some(id) = pending.pop() {
            let Some(seen) = marked.get_mut(id) else {
                continue;
            };
            if std::mem::replace(seen, true) {
                continue;
            }
            if let Some(record) = self.record(id) {
                pending.extend(record.parent);
                pending.extend(record.symbols.values().filter_map(captured));
            }
        }

        let mut garbage = Vec::new();
        for (id, (slot, reachable)) in self.slots.iter_mut().zip(marked).enumerate() {
            if !reachable && let Some(record) = slot.take() {
                garbage.push(record);
                self.free.push(id);
            }
        }
        self.live -= garbage.len();
        self.threshold = (2 * self.live).max(MIN_SWEEP);
        garbage
    }
}

/// State shared by every scope of one interpreter session.
struct Session {
    host: Box<dyn HostResolver>,
    loader: Box<dyn SourceLoader>,
    parse: ParseConfig,
    config: EvalConfig,
    depth: Cell<usize>,
    scopes: RefCell<Arena>,
}

/// Handle to one evaluation scope.
#[derive(Clone)]
pub struct Evaluator {
    session: Rc<Session>,
    pin: Rc<ScopePin>,
}

/// The scope a closure was defined in.
///
/// Pins the scope but not the session.
#[derive(Clone)]
pub(crate) struct ScopeRef {
    session: Weak<Session>,
    pin: Rc<ScopePin>,
}

impl ScopeRef {
    pub(crate) fn resolve(&self) -> Result<Evaluator, Error> {
        let session = self.session.upgrade().ok_or_else(|| {
            Error::domain("the scope this closure was defined in no longer exists")
        })?;
        Ok(Evaluator {
            session,
            pin: Rc::clone(&self.pin),
        })
    }

    /// The scope id, if this reference belongs to `session`.
    fn id_in(&self, session: &Rc<Session>) -> Option<ScopeId> {
        std::ptr::eq(self.session.as_ptr(), Rc::as_ptr(session)).then_some(self.pin.0)
    }
}

/// Decrements the session depth when an `evaluate` call returns.
struct DepthGuard<'a> {
    depth: &'a Cell<usize>,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

impl Evaluator {
    /// A root scope with no bindings at all.
    pub fn bare(
        host: Box<dyn HostResolver>,
        loader: Box<dyn SourceLoader>,
        parse: ParseConfig,
        config: EvalConfig,
    ) -> Self {
        let mut scopes = Arena::new();
        let pin = scopes.insert(None);
        let session = Session {
            host,
            loader,
            parse,
            config,
            depth: Cell::new(0),
            scopes: RefCell::new(scopes),
        };
        Evaluator {
            session: Rc::new(session),
            pin,
        }
    }

    /// A root scope holding the special forms and the builtin operations.
    pub fn root(
        host: Box<dyn HostResolver>,
        loader: Box<dyn SourceLoader>,
        parse: ParseConfig,
        config: EvalConfig,
    ) -> Result<Self, Error> {
        let env = Evaluator::bare(host, loader, parse, config);
        env.install(forms::registry()?);
        env.install(builtinops::registry()?);
        Ok(env)
    }

    /// Root scope with the standard host namespaces and file-system `from`.
    pub fn new() -> Result<Self, Error> {
        Evaluator::root(
            Box::new(HostRegistry::standard()),
            Box::new(FileSystemLoader::new()),
            ParseConfig::default(),
            EvalConfig::default(),
        )
    }

    /// Root scope with no host interop and no source loading.
    pub fn sandboxed() -> Result<Self, Error> {
        Evaluator::root(
            Box::new(Sandbox),
            Box::new(Sandbox),
            ParseConfig::default(),
            EvalConfig::default(),
        )
    }

    fn id(&self) -> ScopeId {
        self.pin.0
    }

    fn install(&self, entries: Vec<(&'static str, Function)>) {
        for (name, function) in entries {
            self.set_symbol(name, Value::Function(function));
        }
    }

    /// A fresh, empty scope whose parent is this one.
    pub fn child(&self) -> Evaluator {
        let crowded = {
            let scopes = self.session.scopes.borrow();
            scopes.live >= scopes.threshold
        };
        if crowded {
            self.collect();
        }
        let pin = self.session.scopes.borrow_mut().insert(Some(self.id()));
        Evaluator {
            session: Rc::clone(&self.session),
            pin,
        }
    }

    pub fn parent(&self) -> Option<Evaluator> {
        let mut scopes = self.session.scopes.borrow_mut();
        let parent = scopes.record(self.id())?.parent?;
        let pin = scopes.pin(parent)?;
        Some(Evaluator {
            session: Rc::clone(&self.session),
            pin,
        })
    }

    pub fn is_root(&self) -> bool {
        self.id() == ROOT
    }

    pub fn parse_config(&self) -> ParseConfig {
        self.session.parse
    }

    pub fn config(&self) -> EvalConfig {
        self.session.config
    }

    /// Whether two handles point at the same scope.
    pub fn same_scope(&self, other: &Evaluator) -> bool {
        Rc::ptr_eq(&self.session, &other.session) && self.id() == other.id()
    }

    /// Reference to this scope for a closure defined in it.
    pub(crate) fn capture(&self) -> ScopeRef {
        ScopeRef {
            session: Rc::downgrade(&self.session),
            pin: Rc::clone(&self.pin),
        }
    }

    /// Sweep unreachable scopes out of the session arena.
    fn collect(&self) {
        let garbage = self.session.scopes.borrow_mut().sweep(&self.session);
        if !garbage.is_empty() {
            tracing::trace!(freed = garbage.len(), "scopes swept");
        }
    }

    /// Fetch `path` through the session loader and parse it.
    pub(crate) fn load_source(&self, path: &str) -> Result<Program, Error> {
        let text = self.session.loader.load(path)?;
        program::parse_with_config(&text, self.parse_config())
    }

    fn enter(&self) -> Result<DepthGuard<'_>, Error> {
        let session = &self.session;
        let depth = session.depth.get();
        if depth >= session.config.max_depth {
            tracing::warn!(limit = session.config.max_depth, "evaluation depth limit reached");
            return Err(Error::StackExhausted {
                limit: session.config.max_depth,
            });
        }
        session.depth.set(depth + 1);
        Ok(DepthGuard {
            depth: &session.depth,
        })
    }

    /// Evaluate a program in this scope.
    ///
    /// Empty programs are `Empty`, combinations are calls, single tokens are
    /// literals or symbols, and anything else is a sequence of forms.
    pub fn evaluate(&self, program: &Program) -> Result<Value, Error> {
        let result = {
            let _guard = self.enter()?;
            stack::ensure_sufficient_stack(|| match program.tokens() {
                [] => Ok(Value::Empty),
                _ if program.is_combination() => self.combination(program),
                [token] => self.atomic(token),
                _ => self.sequence(program),
            })
        };

        // Top-level form boundary; a lone root has nothing to sweep
        if self.session.depth.get() == 0 && self.session.scopes.borrow().live > 1 {
            self.collect();
        }
        result
    }

    fn atomic(&self, token: &Token) -> Result<Value, Error> {
        if token.is_paren() {
            return Err(Error::MalformedProgram(ParseError::new(
                ParseErrorKind::BareParenthesis,
                format!("bare '{token}' cannot be evaluated"),
                None,
            )));
        }
        match Value::literal(token.as_str()) {
            Some(value) => Ok(value),
            None => self.symbol(token.as_str()),
        }
    }

    fn combination(&self, program: &Program) -> Result<Value, Error> {
        let mut forms = program.split().into_iter();
        let Some(operator_form) = forms.next() else {
            return Err(Error::NotCallable {
                found: "an empty combination".to_owned(),
            });
        };

        let mut operator = self.evaluate(&operator_form)?;
        // A name produced by the operator form is looked up once more
        if let Value::Symbol(name) = &operator {
            operator = self.symbol(name)?;
        }
        let Value::Function(function) = operator else {
            return Err(Error::NotCallable {
                found: format!("{operator} ({})", operator.type_name()),
            });
        };

        tracing::trace!(operator = %function, operands = forms.len(), "dispatch");

        let args = if function.signature().is_lazy() {
            forms.map(Operand::Program).collect()
        } else {
            forms
                .map(|form| self.evaluate(&form).map(Operand::Value))
                .collect::<Result<Vec<_>, _>>()?
        };
        function.call(args, self)
    }

    fn sequence(&self, program: &Program) -> Result<Value, Error> {
        program::validate(program)?;
        program
            .split()
            .iter()
            .try_fold(Value::Empty, |_, form| self.evaluate(form))
    }

    /// Look `name` up through the scope chain, then the host resolver.
    pub fn symbol(&self, name: &str) -> Result<Value, Error> {
        let found = self.session.scopes.borrow().lookup(self.id(), name);
        if let Some(value) = found {
            return Ok(value);
        }

        self.session
            .host
            .resolve(name)
            .map(Value::Function)
            .ok_or_else(|| Error::UndefinedSymbol(name.to_owned()))
    }

    /// Bind `name` in this scope, shadowing any binding in a parent.
    pub fn set_symbol(&self, name: impl Into<String>, value: Value) {
        // The displaced value is dropped once the arena is released
        let _displaced = self
            .session
            .scopes
            .borrow_mut()
            .record_mut(self.id())
            .and_then(|record| record.symbols.insert(name.into(), value));
    }

    /// Whether `name` is bound in this scope itself.
    pub fn has_local(&self, name: &str) -> bool {
        self.session
            .scopes
            .borrow()
            .record(self.id())
            .is_some_and(|record| record.symbols.contains_key(name))
    }

    /// Every binding visible from this scope, sorted by name; inner
    /// bindings hide outer ones.
    pub fn bindings(&self) -> Vec<(String, Value)> {
        let scopes = self.session.scopes.borrow();
        let mut chain = Vec::new();
        let mut current = scopes.record(self.id());
        while let Some(record) = current {
            chain.push(record);
            current = record.parent.and_then(|parent| scopes.record(parent));
        }

        let mut visible = BTreeMap::new();
        for record in chain.into_iter().rev() {
            for (name, value) in &record.symbols {
                visible.insert(name.clone(), value.clone());
            }
        }
        visible.into_iter().collect()
    }

    #[cfg(test)]
    pub(crate) fn live_scopes(&self) -> usize {
        self.session.scopes.borrow().live
    }

    /// Bind a typed Rust function; its signature follows the parameter types.
    ///
    /// ```
    /// use sexpeval::{Evaluator, parse, Value};
    ///
    /// let env = Evaluator::sandboxed().unwrap();
    /// env.register_function("twice", |x: i64| x * 2).unwrap();
    /// let result = env.evaluate(&parse("(twice 21)").unwrap()).unwrap();
    /// assert_eq!(result, Value::Int(42));
    /// ```
    pub fn register_function<Args, F>(&self, name: &str, f: F) -> Result<(), Error>
    where
        F: IntoFunction<Args>,
    {
        let function = f.into_function()?.named(format!("#<builtin:{name}>"));
        self.set_symbol(name, Value::Function(function));
        Ok(())
    }

    /// Bind a typed Rust function whose last parameter is a
    /// [`Rest`](crate::function::Rest) tail.
    ///
    /// ```
    /// use sexpeval::{Evaluator, parse, Value};
    /// use sexpeval::function::Rest;
    ///
    /// let env = Evaluator::sandboxed().unwrap();
    /// env.register_variadic_function("count", |rest: Rest<Value>| rest.len() as i64)
    ///     .unwrap();
    /// let result = env.evaluate(&parse("(count 1 true 2.5)").unwrap()).unwrap();
    /// assert_eq!(result, Value::Int(3));
    /// ```
    pub fn register_variadic_function<Args, F>(&self, name: &str, f: F) -> Result<(), Error>
    where
        F: IntoVariadicFunction<Args>,
    {
        let function = f
            .into_variadic_function()?
            .named(format!("#<builtin:{name}>"));
        self.set_symbol(name, Value::Function(function));
        Ok(())
    }
}

impl fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluator")
            .field("scope", &self.id())
            .field(
                "bindings",
                &self
                    .session
                    .scopes
                    .borrow()
                    .record(self.id())
                    .map_or(0, |record| record.symbols.len()),
            )
            .field("is_root", &self.is_root())
            .finish()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::function::Arity;
    use crate::program::parse;
    use crate::value::{Complex, sym, val};

    /// Test result variants for comprehensive testing
    #[derive(Debug)]
    enum TestResult {
        EvalResult(Value),           // Evaluation should succeed with this value
        SpecificError(&'static str), // Evaluation should fail with error containing this string
        Succeeds,                    // Evaluation should succeed (any value)
    }
    use TestResult::*;

    /// Test environment containing test cases that share state
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(val(value))
    }

    fn new_env() -> Evaluator {
        Evaluator::new().unwrap()
    }

    fn execute_test_case(input: &str, expected: &TestResult, env: &Evaluator, test_id: &str) {
        let program = match parse(input) {
            Ok(program) => program,
            Err(parse_err) => {
                panic!("{test_id}: unexpected parse error for '{input}': {parse_err:?}");
            }
        };

        match (env.evaluate(&program), expected) {
            (Ok(actual), EvalResult(expected_val)) => {
                assert_eq!(
                    &actual, expected_val,
                    "{test_id}: '{input}' expected {expected_val:?}, got {actual:?}"
                );
            }
            (Ok(_), Succeeds) => {}
            (Err(e), SpecificError(expected_text)) => {
                let error_msg = format!("{e}");
                assert!(
                    error_msg.contains(expected_text),
                    "{test_id}: '{input}' error should contain '{expected_text}', got: {error_msg}"
                );
            }
            (Err(err), Succeeds) => {
                panic!("{test_id}: '{input}' expected success, got error {err:?}");
            }
            (Ok(actual), SpecificError(expected_text)) => {
                panic!("{test_id}: '{input}' expected error containing '{expected_text}', got {actual:?}");
            }
            (Err(err), EvalResult(expected_val)) => {
                panic!("{test_id}: '{input}' expected {expected_val:?}, got error {err:?}");
            }
        }
    }

    /// Run tests in isolated environments with shared state
    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let env = new_env();
            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(input, expected, &env, &test_id);
            }
        }
    }

    /// Each case in a fresh root scope
    fn run_comprehensive_tests(test_cases: Vec<(&str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let env = new_env();
            let test_id = format!("#{}", i + 1);
            execute_test_case(input, expected, &env, &test_id);
        }
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_comprehensive_operations_data_driven() {
        let test_cases = vec![
            // === LITERALS ===
            ("42", success(42)),
            ("-271", success(-271)),
            ("3.5", success(3.5)),
            ("1e3", success(1000.0)),
            ("2j", success(Complex::new(0.0, 2.0))),
            ("1-1j", success(Complex::new(1.0, -1.0))),
            ("true", success(true)),
            ("false", success(false)),
            ("", EvalResult(Value::Empty)),
            // === SYMBOL LOOKUP ===
            ("undefined-var", SpecificError("UndefinedSymbol")),
            ("j", SpecificError("UndefinedSymbol")),
            ("+", Succeeds),
            // === ARITHMETIC ===
            ("(+ 1 2 3)", success(6)),
            ("(- 10 4)", success(6)),
            ("(* 2 (+ 1 2))", success(6)),
            ("(/ 1 2)", success(0.5)),
            ("(/ 1 0)", SpecificError("The divisor cannot be zero.")),
            ("(// 9 2)", success(4)),
            ("(% 9 4)", success(1)),
            ("(^ 2 8)", success(256)),
            ("(+ 1 2.5)", success(3.5)),
            ("(+ 1 1j)", success(Complex::new(1.0, 1.0))),
            ("(max 3 9 4)", success(9)),
            ("(min 3 9 4)", success(3)),
            // === COMPARISON AND LOGIC ===
            ("(< 1 2)", success(true)),
            ("(>= 1 2)", success(false)),
            ("(= 1 1)", success(true)),
            ("(= 1 1.0)", success(false)),
            ("(!= 1 2)", success(true)),
            ("(not (= 1 2))", success(true)),
            ("(and true (< 1 2))", success(true)),
            ("(or false false)", success(false)),
            // === CONDITIONALS ===
            ("(if true 1 2)", success(1)),
            ("(if false 1 2)", success(2)),
            ("(if (< 1 2) 10 20)", success(10)),
            ("(if true 1 (/ 1 0))", success(1)),
            ("(if false (/ 1 0) 2)", success(2)),
            ("(if false (undefined-fn) 2)", success(2)),
            // Everything except false is truthy
            ("(if 0 1 2)", success(1)),
            ("(if (+ 0 0.0) 1 2)", success(1)),
            // === DEFINE ===
            ("(define x 5)", success(5)),
            ("(def y (+ 1 2))", success(3)),
            ("(define 42 5)", SpecificError("InvalidSymbolName")),
            ("(define (f) 5)", SpecificError("InvalidSymbolName")),
            // === LAMBDA ===
            ("((lambda (x) (* x x)) 7)", success(49)),
            ("((lam (x y) (+ x y)) 3 4)", success(7)),
            ("((lambda () 42))", success(42)),
            ("((lambda (x) x) 1 2)", SpecificError("ArityMismatch")),
            ("((lambda (x) x))", SpecificError("expected exactly 1 arguments, got 0")),
            ("(lambda (x x) x)", SpecificError("InvalidFormalParameterList")),
            ("(lambda (1) 1)", SpecificError("InvalidFormalParameterList")),
            ("(lambda ((x)) 1)", SpecificError("InvalidFormalParameterList")),
            ("(lambda x x)", SpecificError("InvalidFormalParameterList")),
            ("(lambda (x))", SpecificError("ArityMismatch")),
            // === MACRO ===
            ("((macro (a) (+ a a)) 21)", success(42)),
            ("((mac (a b) (if a b 0)) true 5)", success(5)),
            ("((macro (a) a) (+ 1 2))", success(3)),
            ("(macro (a a) a)", SpecificError("InvalidFormalParameterList")),
            // === HOST INTEROP ===
            ("(abs -5)", success(5)),
            ("(math:sqrt 16)", success(4.0)),
            ("(math:floor 2.7)", success(2)),
            ("(float 2)", success(2.0)),
            ("(math:nope 1)", SpecificError("UndefinedSymbol")),
            // === CALL ERRORS ===
            ("(1 2 3)", SpecificError("NotCallable")),
            ("(true)", SpecificError("NotCallable")),
            ("()", SpecificError("NotCallable")),
            ("(foo 1)", SpecificError("UndefinedSymbol: 'foo'")),
            ("(+ 1 true)", SpecificError("argument 2 must be Number, got Bool")),
            ("(not 1)", SpecificError("TypeMismatch")),
            ("(- 1)", SpecificError("ArityMismatch")),
            // === SEQUENCES ===
            ("1 2 3", success(3)),
            ("(define a 1) (define b 2) (+ a b)", success(3)),
        ];

        run_comprehensive_tests(test_cases);
    }

    #[test]
    fn test_scoping_and_closures() {
        let environments = vec![
            TestEnvironment(vec![
                // Inner x never escapes the call
                ("(define x 5)", success(5)),
                ("(define f (lambda (x) (+ x 1)))", Succeeds),
                ("(f 10)", success(11)),
                ("x", success(5)),
            ]),
            TestEnvironment(vec![
                // define inside a lambda body shadows instead of mutating
                ("(define x 1)", success(1)),
                ("(define g (lambda () (define x 99)))", Succeeds),
                ("(g)", success(99)),
                ("x", success(1)),
            ]),
            TestEnvironment(vec![
                // Closures capture their defining scope
                ("(define make-adder (lambda (n) (lambda (x) (+ x n))))", Succeeds),
                ("(define add5 (make-adder 5))", Succeeds),
                ("(define add10 (make-adder 10))", Succeeds),
                ("(add5 1)", success(6)),
                ("(add10 1)", success(11)),
                ("n", SpecificError("UndefinedSymbol")),
            ]),
            TestEnvironment(vec![
                // Free variables resolve at call time
                ("(define get-y (lambda () y))", Succeeds),
                ("(get-y)", SpecificError("UndefinedSymbol: 'y'")),
                ("(define y 7)", success(7)),
                ("(get-y)", success(7)),
            ]),
            TestEnvironment(vec![
                // Recursion through the defining scope
                (
                    "(define fact (lambda (n) (if (<= n 1) 1 (* n (fact (- n 1))))))",
                    Succeeds,
                ),
                ("(fact 10)", success(3_628_800)),
                ("(fact 20)", success(2_432_902_008_176_640_000i64)),
                ("(fact 21)", SpecificError("integer overflow")),
            ]),
            TestEnvironment(vec![
                // Builtins can be shadowed locally and globally
                ("((lambda (+) (+ 2 3)) *)", success(6)),
                ("(+ 2 3)", success(5)),
                ("(define + -)", Succeeds),
                ("(+ 2 3)", success(-1)),
            ]),
            TestEnvironment(vec![
                // A failing form leaves earlier bindings in place
                ("(define keep 1)", success(1)),
                ("(define broken (/ 1 0))", SpecificError("DomainError")),
                ("keep", success(1)),
                ("broken", SpecificError("UndefinedSymbol")),
            ]),
        ];

        run_tests_in_environment(environments);
    }

    #[test]
    fn test_macro_is_not_hygienic() {
        let env = new_env();
        env.evaluate(&parse("(define x 1)").unwrap()).unwrap();
        env.evaluate(&parse("(define m (macro (a) (+ a a)))").unwrap())
            .unwrap();
        env.evaluate(&parse("(define x 20)").unwrap()).unwrap();

        // The caller's current x is observed
        let result = env.evaluate(&parse("(m x)").unwrap()).unwrap();
        assert_eq!(result, val(40));

        // Evaluated in the caller's scope: a lambda parameter named x is seen
        let result = env
            .evaluate(&parse("((lambda (x) (m x)) 3)").unwrap())
            .unwrap();
        assert_eq!(result, val(6));

        // Substituted identifiers are captured by bindings in the body
        env.evaluate(&parse("(define swap (macro (a) ((lambda (x) a) 100)))").unwrap())
            .unwrap();
        assert_eq!(env.evaluate(&parse("(swap x)").unwrap()).unwrap(), val(100));

        // A macro argument that is never substituted is never evaluated
        env.evaluate(&parse("(define ignore (macro (a) 0))").unwrap())
            .unwrap();
        assert_eq!(
            env.evaluate(&parse("(ignore (/ 1 0))").unwrap()).unwrap(),
            val(0)
        );

        // Repeated expansion never mutates the body
        assert_eq!(env.evaluate(&parse("(m 1)").unwrap()).unwrap(), val(2));
        assert_eq!(env.evaluate(&parse("(m 2.5)").unwrap()).unwrap(), val(5.0));
    }

    #[test]
    fn test_symbol_operator_is_resolved_again() {
        let env = new_env();
        // The operator form evaluates to a name, which is looked up once more
        env.set_symbol("times-name", sym("*"));
        assert_eq!(
            env.evaluate(&parse("(times-name 6 7)").unwrap()).unwrap(),
            val(42)
        );

        env.set_symbol("dangling", sym("nothing-here"));
        assert_eq!(
            env.evaluate(&parse("(dangling 1)").unwrap()),
            Err(Error::UndefinedSymbol("nothing-here".into()))
        );
    }

    #[test]
    fn test_lookup_and_assignment() {
        let root = Evaluator::sandboxed().unwrap();
        root.set_symbol("x", val(1));

        let child = root.child();
        assert_eq!(child.symbol("x").unwrap(), val(1));
        assert!(!child.has_local("x"));

        child.set_symbol("x", val(2));
        assert_eq!(child.symbol("x").unwrap(), val(2));
        assert_eq!(root.symbol("x").unwrap(), val(1));

        let grandchild = child.child();
        assert_eq!(grandchild.symbol("x").unwrap(), val(2));
        assert!(grandchild.parent().unwrap().same_scope(&child));
        assert!(root.is_root() && !grandchild.is_root());

        // Sandboxed roots have no host fallback
        assert_eq!(
            grandchild.symbol("abs"),
            Err(Error::UndefinedSymbol("abs".into()))
        );

        let visible = grandchild.bindings();
        let x = visible.iter().find(|(name, _)| name == "x").unwrap();
        assert_eq!(x.1, val(2));
        assert!(visible.windows(2).all(|pair| pair[0].0 < pair[1].0));
    }

    #[test]
    fn test_dropping_the_root_frees_the_session() {
        let env = new_env();
        env.evaluate(
            &parse(
                "(define f (lambda (x) x))
                 (define make-adder (lambda (n) (lambda (x) (+ x n))))
                 (define add5 (make-adder 5))",
            )
            .unwrap(),
        )
        .unwrap();
        assert_eq!(env.evaluate(&parse("(add5 1)").unwrap()).unwrap(), val(6));

        let session = Rc::downgrade(&env.session);
        drop(env);
        assert!(session.upgrade().is_none());
    }

    #[test]
    fn test_call_scopes_are_swept() {
        let env = new_env();
        env.evaluate(
            &parse("(define g (lambda (n) (if (define h (lambda (y) (+ y n))) (h 1) 0)))").unwrap(),
        )
        .unwrap();
        for i in 0..1000 {
            let result = env.evaluate(&parse(&format!("(g {i})")).unwrap()).unwrap();
            assert_eq!(result, val(i + 1));
        }
        assert_eq!(env.live_scopes(), 1);

        // Garbage is also swept during one long evaluation
        let session = Rc::downgrade(&env.session);
        env.register_function("live-scopes", move || {
            let live = session.upgrade().map_or(0, |session| {
                let scopes = session.scopes.borrow();
                scopes.live
            });
            i64::try_from(live).unwrap_or(i64::MAX)
        })
        .unwrap();
        env.evaluate(
            &parse("(define run (lambda (n) (if (= n 0) (live-scopes) (if (g n) (run (- n 1)) 0))))")
                .unwrap(),
        )
        .unwrap();
        // 200 frames are live; unswept, the helper scopes would add 400 more
        let Value::Int(live) = env.evaluate(&parse("(run 200)").unwrap()).unwrap() else {
            panic!("live-scopes returns an Int");
        };
        assert!((200..450).contains(&live), "live scopes: {live}");
        assert_eq!(env.live_scopes(), 1);
    }

    #[test]
    fn test_closures_keep_their_scope_alive() {
        let env = new_env();
        env.evaluate(&parse("(define make-adder (lambda (n) (lambda (x) (+ x n))))").unwrap())
            .unwrap();

        // Held by the host across later evaluations and sweeps
        let Value::Function(add5) = env.evaluate(&parse("(make-adder 5)").unwrap()).unwrap()
        else {
            panic!("make-adder returns a function");
        };
        for _ in 0..100 {
            env.evaluate(&parse("((make-adder 1) 1)").unwrap()).unwrap();
        }
        assert_eq!(env.live_scopes(), 2);
        assert_eq!(add5.call(vec![Operand::Value(val(1))], &env).unwrap(), val(6));

        // Held by a binding until it is rebound
        env.evaluate(&parse("(define add7 (make-adder 7))").unwrap()).unwrap();
        assert_eq!(env.live_scopes(), 3);
        assert_eq!(env.evaluate(&parse("(add7 1)").unwrap()).unwrap(), val(8));
        env.evaluate(&parse("(define add7 0)").unwrap()).unwrap();
        assert_eq!(env.live_scopes(), 2);

        // Once its session is gone the closure can no longer run
        drop(env);
        let other = new_env();
        assert!(matches!(
            add5.call(vec![Operand::Value(val(1))], &other),
            Err(Error::DomainError(_))
        ));
    }

    #[test]
    fn test_register_functions() {
        fn safe_div(a: i64, b: i64) -> Result<i64, Error> {
            if b == 0 {
                Err(Error::domain("division by zero"))
            } else {
                Ok(a / b)
            }
        }

        let env = Evaluator::sandboxed().unwrap();
        env.register_function("safe-div", safe_div).unwrap();
        env.register_function("forty-two", || 42).unwrap();
        env.register_variadic_function("sum", |nums: crate::function::Rest<i64>| {
            nums.iter().sum::<i64>()
        })
        .unwrap();

        let eval = |text: &str| env.evaluate(&parse(text).unwrap());
        assert_eq!(eval("(safe-div 10 2)").unwrap(), val(5));
        assert_eq!(
            eval("(safe-div 1 0)"),
            Err(Error::domain("division by zero"))
        );
        assert_eq!(eval("(forty-two)").unwrap(), val(42));
        assert_eq!(eval("(sum)").unwrap(), val(0));
        assert_eq!(eval("(sum 1 2 3)").unwrap(), val(6));
        assert_eq!(
            eval("(forty-two 1)"),
            Err(Error::ArityMismatch {
                expected: Arity::Exact(0),
                got: 1
            })
        );
        assert_eq!(
            eval("safe-div").unwrap().to_string(),
            "#<builtin:safe-div>"
        );
    }

    #[test]
    fn test_unchecked_programs() {
        let env = new_env();
        assert!(matches!(
            env.evaluate(&program::tokenize(")")),
            Err(Error::MalformedProgram(ParseError {
                kind: ParseErrorKind::BareParenthesis,
                ..
            }))
        ));

        // Top-level sequences are checked before any form runs
        assert!(matches!(
            env.evaluate(&program::tokenize("(define a 1) a)")),
            Err(Error::MalformedProgram(ParseError {
                kind: ParseErrorKind::UnexpectedClose,
                ..
            }))
        ));
        assert!(!env.has_local("a"));
    }

    #[test]
    fn test_evaluation_depth_limit() {
        let depth_test_environments = vec![TestEnvironment(vec![
            (
                "(define deep (lambda (n) (if (= n 0) 0 (+ 1 (deep (- n 1))))))",
                Succeeds,
            ),
            ("(deep 10)", success(10)),
            ("(deep 100000)", SpecificError("StackExhausted")),
            // The session recovers once the failing call unwinds
            ("(deep 20)", success(20)),
        ])];

        run_tests_in_environment(depth_test_environments);

        let shallow = Evaluator::root(
            Box::new(Sandbox),
            Box::new(Sandbox),
            ParseConfig::default(),
            EvalConfig { max_depth: 3 },
        )
        .unwrap();
        assert_eq!(
            shallow.evaluate(&parse("(+ 1 (+ 2 (+ 3 4)))").unwrap()),
            Err(Error::StackExhausted { limit: 3 })
        );
        assert_eq!(
            shallow.evaluate(&parse("(+ 1 2)").unwrap()).unwrap(),
            val(3)
        );
    }
}
