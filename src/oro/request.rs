//! Request expressions as they appear in the server log, e.g.
//! `updateForAgent("ROBOT", [ROBOT isSitting true])`, and the table of
//! server methods they may name.

use std::collections::HashMap;
use std::fmt;

use crate::error::DispatchError;

/// Shape of a single argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Plain value: string, number or boolean
    Text,
    /// `[a, b]` list/set or `{k: v}` map, sent verbatim
    Collection,
}

impl ArgKind {
    /// A plain-value position also takes a `{...}` map: the server logs
    /// maps unquoted and hands them to string parameters as JSON.
    pub fn accepts(&self, arg: &Arg) -> bool {
        match (self, arg) {
            (ArgKind::Text, Arg::Text(_)) | (ArgKind::Collection, Arg::Collection(_)) => true,
            (ArgKind::Text, Arg::Collection(s)) => s.starts_with('{'),
            (ArgKind::Collection, Arg::Text(_)) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Text(String),
    Collection(String),
}

impl Arg {
    pub fn kind(&self) -> ArgKind {
        match self {
            Arg::Text(_) => ArgKind::Text,
            Arg::Collection(_) => ArgKind::Collection,
        }
    }

    /// The line sent on the wire for this argument.
    pub fn as_wire(&self) -> &str {
        match self {
            Arg::Text(s) | Arg::Collection(s) => s,
        }
    }
}

/// A method call parsed out of a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub args: Vec<Arg>,
}

impl Request {
    pub fn new(method: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    /// Parse `name(arg, ...)`.
    pub fn parse(text: &str) -> Result<Self, DispatchError> {
        let text = text.trim();
        let open = text
            .find('(')
            .ok_or_else(|| malformed(text, "missing '('"))?;
        if !text.ends_with(')') {
            return Err(malformed(text, "missing closing ')'"));
        }

        let method = text[..open].trim();
        if method.is_empty() || !method.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(malformed(text, "invalid method name"));
        }

        let body = &text[open + 1..text.len() - 1];
        let args = split_args(body)
            .map_err(|reason| malformed(text, reason))?
            .into_iter()
            .map(|raw| parse_arg(&raw))
            .collect::<Vec<_>>();

        if args.iter().any(|a| a.as_wire().contains('\n')) {
            return Err(malformed(text, "argument spans several lines"));
        }

        Ok(Request::new(method, args))
    }

    /// Encode the request frame: method name, one line per argument, then
    /// the terminator.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = String::with_capacity(64);
        buf.push_str(&self.method);
        buf.push('\n');
        for arg in &self.args {
            buf.push_str(arg.as_wire());
            buf.push('\n');
        }
        buf.push_str(super::MESSAGE_TERMINATOR);
        buf.push('\n');
        buf.into_bytes()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.method)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match arg {
                Arg::Text(s) => write!(f, "\"{}\"", s)?,
                Arg::Collection(s) => write!(f, "{}", s)?,
            }
        }
        write!(f, ")")
    }
}

fn malformed(text: &str, reason: &str) -> DispatchError {
    DispatchError::Malformed(format!("{} in '{}'", reason, text))
}

/// Split on commas that are neither nested in brackets nor quoted. Inside
/// brackets only `"` quotes: collections are logged verbatim and may hold
/// apostrophes (`[ROBOT hasName O'Brien]`).
fn split_args(body: &str) -> Result<Vec<String>, &'static str> {
    let mut args = Vec::new();
    if body.trim().is_empty() {
        return Ok(args);
    }

    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in body.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' => {
                quote = Some(c);
                current.push(c);
            }
            '\'' if depth == 0 => {
                quote = Some(c);
                current.push(c);
            }
            '[' | '{' | '(' => {
                depth += 1;
                current.push(c);
            }
            ']' | '}' | ')' => {
                depth = depth.checked_sub(1).ok_or("unbalanced brackets")?;
                current.push(c);
            }
            ',' if depth == 0 => {
                args.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }

    if quote.is_some() {
        return Err("unterminated string");
    }
    if depth != 0 {
        return Err("unbalanced brackets");
    }
    args.push(current);

    if args.iter().any(|a| a.trim().is_empty()) {
        return Err("empty argument");
    }
    Ok(args)
}

fn parse_arg(raw: &str) -> Arg {
    let raw = raw.trim();
    if raw.starts_with('[') || raw.starts_with('{') {
        return Arg::Collection(raw.to_string());
    }
    for q in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(q) && raw.ends_with(q) {
            return Arg::Text(unescape(&raw[1..raw.len() - 1], q));
        }
    }
    Arg::Text(raw.to_string())
}

fn unescape(s: &str, quote: char) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(n) if n == quote || n == '\\' => out.push(n),
                Some(n) => {
                    out.push(c);
                    out.push(n);
                }
                None => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Closed set of methods a connection accepts, with the argument shapes
/// each one takes. Names are matched case-insensitively, like the server
/// does.
#[derive(Debug, Clone)]
pub struct MethodTable {
    methods: HashMap<String, (&'static str, Vec<&'static [ArgKind]>)>,
}

use ArgKind::{Collection as C, Text as T};

const ORO_METHODS: &[(&str, &[ArgKind])] = &[
    ("add", &[C]),
    ("add", &[C, T]),
    ("addForAgent", &[T, C]),
    ("addForAgent", &[T, C, T]),
    ("check", &[C]),
    ("checkConsistency", &[]),
    ("checkConsistency", &[C]),
    ("checkConsistencyForAgent", &[T]),
    ("clear", &[C]),
    ("clearEvent", &[T]),
    ("clearEvent", &[T, T]),
    ("clearEvents", &[]),
    ("clearEventsForAgent", &[T]),
    ("clearForAgent", &[T, C]),
    ("discriminate", &[C]),
    ("discriminateForAgent", &[T, C]),
    ("find", &[T, C]),
    ("find", &[T, C, C]),
    ("find", &[C, C, C, C]),
    ("findForAgent", &[T, T, C]),
    ("findForAgent", &[T, T, C, C]),
    ("getClassesOf", &[T]),
    ("getDifferences", &[T, T]),
    ("getDirectClassesOf", &[T]),
    ("getDirectInstancesOf", &[T]),
    ("getDirectSubclassesOf", &[T]),
    ("getDirectSuperclassesOf", &[T]),
    ("getInfos", &[T]),
    ("getInfosForAgent", &[T, T]),
    ("getInstancesOf", &[T]),
    ("getLabel", &[T]),
    ("getResourceDetails", &[T]),
    ("getResourceDetails", &[T, T]),
    ("getSimilarities", &[T, T]),
    ("getSubclassesOf", &[T]),
    ("getSuperclassesOf", &[T]),
    ("help", &[]),
    ("list", &[T]),
    ("listAgents", &[]),
    ("listMethods", &[]),
    ("listSimpleMethods", &[]),
    ("lookup", &[T]),
    ("lookup", &[T, T]),
    ("lookupForAgent", &[T, T]),
    ("makeHtmlDoc", &[]),
    ("processNL", &[T]),
    ("query", &[T, T]),
    ("queryAsXML", &[T]),
    ("registerEvent", &[T, T, C]),
    ("registerEvent", &[T, T, T, C]),
    ("registerEventForAgent", &[T, T, T, C]),
    ("registerEventForAgent", &[T, T, T, T, C]),
    ("remove", &[C]),
    ("removeForAgent", &[T, C]),
    ("reset", &[]),
    ("revise", &[C, T]),
    ("safeAdd", &[C]),
    ("safeAdd", &[C, T]),
    ("safeAdd", &[T, C]),
    ("safeAdd", &[T, C, T]),
    ("safeAddForAgent", &[T, C]),
    ("safeAddForAgent", &[T, C, T]),
    ("save", &[]),
    ("save", &[T]),
    ("save", &[T, T]),
    ("stats", &[]),
    ("update", &[C]),
    ("updateForAgent", &[T, C]),
];

impl MethodTable {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// The methods served by oro-server. `close` is left out: replaying it
    /// would end the connection under the worker.
    pub fn oro() -> Self {
        let mut table = Self::new();
        for (name, signature) in ORO_METHODS {
            table.register(name, signature);
        }
        table
    }

    pub fn register(&mut self, name: &'static str, signature: &'static [ArgKind]) {
        self.methods
            .entry(name.to_lowercase())
            .or_insert_with(|| (name, Vec::new()))
            .1
            .push(signature);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(&name.to_lowercase())
    }

    /// Check a request against the table and return it with the method's
    /// canonical spelling.
    pub fn validate(&self, request: &Request) -> Result<Request, DispatchError> {
        let (canonical, signatures) = self
            .methods
            .get(&request.method.to_lowercase())
            .ok_or_else(|| DispatchError::Malformed(format!("unknown method '{}'", request.method)))?;

        let arity_ok = signatures.iter().any(|sig| sig.len() == request.args.len());
        if !arity_ok {
            return Err(DispatchError::Malformed(format!(
                "wrong number of arguments for '{}' ({} given)",
                canonical,
                request.args.len()
            )));
        }

        let matches = signatures.iter().any(|sig| {
            sig.len() == request.args.len()
                && sig.iter().zip(&request.args).all(|(kind, arg)| kind.accepts(arg))
        });
        if !matches {
            return Err(DispatchError::Malformed(format!(
                "no signature of '{}' matches the given arguments",
                canonical
            )));
        }

        Ok(Request::new(*canonical, request.args.clone()))
    }
}

impl Default for MethodTable {
    fn default() -> Self {
        Self::oro()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_no_args() {
        let req = Request::parse("listAgents()").unwrap();
        assert_eq!(req.method, "listAgents");
        assert!(req.args.is_empty());
    }

    #[test]
    fn test_parse_server_logged_call() {
        let req = Request::parse(r#"updateForAgent("ROBOT",[ROBOT isSitting true, HUMAN isVisible true])"#).unwrap();
        assert_eq!(req.method, "updateForAgent");
        assert_eq!(
            req.args,
            vec![
                Arg::Text("ROBOT".to_string()),
                Arg::Collection("[ROBOT isSitting true, HUMAN isVisible true]".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_python_style_call() {
        let req = Request::parse(r#"find('?x', ["?x rdf:type Robot", '?x isIn "room, 1"'])"#).unwrap();
        assert_eq!(req.args.len(), 2);
        assert_eq!(req.args[0], Arg::Text("?x".to_string()));
        assert_eq!(req.args[1].kind(), ArgKind::Collection);
    }

    #[test]
    fn test_parse_bare_and_escaped_values() {
        let req = Request::parse(r#"save("a \"b\"", 42)"#).unwrap();
        assert_eq!(req.args[0], Arg::Text("a \"b\"".to_string()));
        assert_eq!(req.args[1], Arg::Text("42".to_string()));
    }

    #[test]
    fn test_parse_rejects_malformed_text() {
        for text in ["add", "add([a b c]", "add([a b c)", "add(\"open)", "a d d()", "(x)", "add(a,,b)"] {
            let err = Request::parse(text).unwrap_err();
            assert!(matches!(err, DispatchError::Malformed(_)), "{}", text);
        }
    }

    #[test]
    fn test_encode_frame() {
        let req = Request::parse(r#"find("?x", [?x rdf:type Robot])"#).unwrap();
        assert_eq!(req.encode(), b"find\n?x\n[?x rdf:type Robot]\n#end#\n".to_vec());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let req = Request::parse(r#"addForAgent("ROBOT", [a b c])"#).unwrap();
        assert_eq!(req.to_string(), r#"addForAgent("ROBOT", [a b c])"#);
        assert_eq!(Request::parse(&req.to_string()).unwrap(), req);
    }

    #[test]
    fn test_table_canonicalizes_method_name() {
        let table = MethodTable::oro();
        let req = table.validate(&Request::parse("LISTAGENTS()").unwrap()).unwrap();
        assert_eq!(req.method, "listAgents");
    }

    #[test]
    fn test_table_rejects_unknown_method_and_close() {
        let table = MethodTable::oro();
        assert!(!table.contains("close"));
        let err = table.validate(&Request::parse("close()").unwrap()).unwrap_err();
        assert!(err.to_string().contains("unknown method"));
        assert!(table.validate(&Request::parse("explode()").unwrap()).is_err());
    }

    #[test]
    fn test_table_checks_arity_and_kinds() {
        let table = MethodTable::oro();
        let err = table.validate(&Request::parse("add()").unwrap()).unwrap_err();
        assert!(err.to_string().contains("wrong number of arguments"));

        let err = table.validate(&Request::parse(r#"add("not a set")"#).unwrap()).unwrap_err();
        assert!(err.to_string().contains("no signature"));

        assert!(table.validate(&Request::parse("add([a b c])").unwrap()).is_ok());
        assert!(table.validate(&Request::parse(r#"add([a b c], "EPISODIC")"#).unwrap()).is_ok());
        assert!(table.validate(&Request::parse(r#"safeAdd("ROBOT", [a b c])"#).unwrap()).is_ok());
    }

    #[test]
    fn test_apostrophe_inside_collection() {
        let req = Request::parse("add([ROBOT hasName O'Brien, HUMAN hasName D'Arcy])").unwrap();
        assert_eq!(
            req.args,
            vec![Arg::Collection("[ROBOT hasName O'Brien, HUMAN hasName D'Arcy]".to_string())]
        );

        let req = Request::parse(r#"addForAgent("ROBOT",[ROBOT knows "it's, fine"])"#).unwrap();
        assert_eq!(req.args.len(), 2);
    }

    #[test]
    fn test_map_fills_a_plain_value_position() {
        let table = MethodTable::oro();
        let req = Request::parse(r#"revise([ROBOT isOn table],{"method":"add","models":["ROBOT"]})"#).unwrap();
        assert_eq!(req.args[1].kind(), ArgKind::Collection);
        assert!(table.validate(&req).is_ok());
        // lists still don't
        assert!(table.validate(&Request::parse("revise([a b c],[d e f])").unwrap()).is_err());
    }

    #[test]
    fn test_table_accepts_every_logged_server_call() {
        let table = MethodTable::oro();
        let logged = [
            r#"add([ROBOT isOn table])"#,
            r#"add([ROBOT isOn table],"EPISODIC")"#,
            r#"addForAgent("HUMAN",[HUMAN isSitting true])"#,
            r#"addForAgent("HUMAN",[HUMAN isSitting true],"SHORTTERM")"#,
            r#"check([ROBOT isOn table])"#,
            r#"checkConsistency()"#,
            r#"checkConsistency([ROBOT rdf:type Table])"#,
            r#"checkConsistencyForAgent("HUMAN")"#,
            r#"clear([?x isOn table])"#,
            r#"clearEvent("1c2e4b0a")"#,
            r#"clearEvent("HUMAN","1c2e4b0a")"#,
            r#"clearEvents()"#,
            r#"clearEventsForAgent("HUMAN")"#,
            r#"clearForAgent("HUMAN",[?x isOn table])"#,
            r#"discriminate([ROBOT, HUMAN])"#,
            r#"discriminateForAgent("HUMAN",[ROBOT, table])"#,
            r#"find("?x",[?x rdf:type Robot])"#,
            r#"find("?x",[?x rdf:type Robot],[?x hasAge ?a])"#,
            r#"find([?x],[?x rdf:type Robot],[],[HUMAN])"#,
            r#"findForAgent("HUMAN","?x",[?x rdf:type Robot])"#,
            r#"findForAgent("HUMAN","?x",[?x rdf:type Robot],[?x hasAge ?a])"#,
            r#"getClassesOf("ROBOT")"#,
            r#"getDifferences("ROBOT","HUMAN")"#,
            r#"getDirectClassesOf("ROBOT")"#,
            r#"getDirectInstancesOf("Robot")"#,
            r#"getDirectSubclassesOf("Agent")"#,
            r#"getDirectSuperclassesOf("Robot")"#,
            r#"getInfos("ROBOT")"#,
            r#"getInfosForAgent("HUMAN","ROBOT")"#,
            r#"getInstancesOf("Robot")"#,
            r#"getLabel("ROBOT")"#,
            r#"getResourceDetails("ROBOT")"#,
            r#"getResourceDetails("ROBOT","fr")"#,
            r#"getSimilarities("ROBOT","HUMAN")"#,
            r#"getSubclassesOf("Agent")"#,
            r#"getSuperclassesOf("Robot")"#,
            r#"help()"#,
            r#"list("ROB")"#,
            r#"listAgents()"#,
            r#"listMethods()"#,
            r#"listSimpleMethods()"#,
            r#"lookup("Jido")"#,
            r#"lookup("Jido","instance")"#,
            r#"lookupForAgent("HUMAN","Jido")"#,
            r#"makeHtmlDoc()"#,
            r#"processNL("where is the bottle")"#,
            r#"query("x","SELECT ?x WHERE {?x ?p ?o}")"#,
            r#"queryAsXML("SELECT ?x WHERE {?x ?p ?o}")"#,
            r#"registerEvent("NEW_INSTANCE","ON_TRUE",[?x rdf:type Robot])"#,
            r#"registerEvent("NEW_INSTANCE","ON_TRUE","?x",[?x rdf:type Robot])"#,
            r#"registerEventForAgent("HUMAN","NEW_INSTANCE","ON_TRUE",[?x rdf:type Robot])"#,
            r#"registerEventForAgent("HUMAN","NEW_INSTANCE","ON_TRUE","?x",[?x rdf:type Robot])"#,
            r#"remove([ROBOT isOn table])"#,
            r#"removeForAgent("HUMAN",[ROBOT isOn table])"#,
            r#"reset()"#,
            r#"revise([ROBOT isOn table],{"method":"update"})"#,
            r#"safeAdd([ROBOT isOn table])"#,
            r#"safeAdd([ROBOT isOn table],"EPISODIC")"#,
            r#"safeAdd("HUMAN",[ROBOT isOn table])"#,
            r#"safeAdd("HUMAN",[ROBOT isOn table],"EPISODIC")"#,
            r#"safeAddForAgent("HUMAN",[ROBOT isOn table])"#,
            r#"safeAddForAgent("HUMAN",[ROBOT isOn table],"EPISODIC")"#,
            r#"save()"#,
            r#"save("/tmp/oro.owl")"#,
            r#"save("HUMAN","/tmp/human.owl")"#,
            r#"stats()"#,
            r#"update([ROBOT isOn table])"#,
            r#"updateForAgent("HUMAN",[ROBOT isOn table])"#,
        ];
        for line in logged {
            let req = Request::parse(line).unwrap();
            assert!(table.validate(&req).is_ok(), "{}: {:?}", line, table.validate(&req));
        }
    }
}
