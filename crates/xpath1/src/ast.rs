//! Syntax tree produced by the expression parser.

/// A parsed XPath 1.0 expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(String),
    Number(f64),
    LocationPath(LocationPath),
    Variable(String),
    FunctionCall {
        name: String,
        args: Vec<Expression>,
    },
    /// A primary expression followed by predicates, e.g. `$nodes[2]` or `(//a)[last()]`.
    Filter {
        expr: Box<Expression>,
        predicates: Vec<Expression>,
    },
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expression>,
    },
}

impl Expression {
    pub fn is_location_path(&self) -> bool {
        matches!(self, Expression::LocationPath(_))
    }

    /// Calls `visit` on this expression and then on every nested
    /// sub-expression, predicates included, depth first.
    pub fn walk<F: FnMut(&Expression)>(&self, visit: &mut F) {
        visit(self);
        match self {
            Expression::Literal(_) | Expression::Number(_) | Expression::Variable(_) => {}
            Expression::LocationPath(path) => {
                if let PathOrigin::Expr(start) = &path.origin {
                    start.walk(visit);
                }
                path.steps
                    .iter()
                    .flat_map(|step| &step.predicates)
                    .for_each(|p| p.walk(visit));
            }
            Expression::FunctionCall { args, .. } => args.iter().for_each(|a| a.walk(visit)),
            Expression::Filter { expr, predicates } => {
                expr.walk(visit);
                predicates.iter().for_each(|p| p.walk(visit));
            }
            Expression::BinaryOp { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expression::UnaryOp { expr, .. } => expr.walk(visit),
        }
    }

    pub fn for_each_variable<F: FnMut(&str)>(&self, f: &mut F) {
        self.walk(&mut |e| {
            if let Expression::Variable(name) = e {
                f(name)
            }
        });
    }

    pub fn for_each_function<F: FnMut(&str)>(&self, f: &mut F) {
        self.walk(&mut |e| {
            if let Expression::FunctionCall { name, .. } = e {
                f(name)
            }
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Minus,
}

/// Binary operators, loosest binding first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Or,
    And,
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Union,
}

/// Where a location path starts walking.
#[derive(Debug, Clone, PartialEq)]
pub enum PathOrigin {
    /// The context node (`foo/bar`).
    Context,
    /// The root of the context node's document (`/foo`).
    Root,
    /// The node-set produced by a filter expression (`$var/foo`, `key('k', 1)//bar`).
    Expr(Box<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationPath {
    pub origin: PathOrigin,
    pub steps: Vec<Step>,
}

impl LocationPath {
    pub fn relative(steps: Vec<Step>) -> Self {
        LocationPath {
            origin: PathOrigin::Context,
            steps,
        }
    }

    pub fn absolute(steps: Vec<Step>) -> Self {
        LocationPath {
            origin: PathOrigin::Root,
            steps,
        }
    }
}

/// One step of a location path, like `child::foo[position() > 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub node_test: NodeTest,
    pub predicates: Vec<Expression>,
}

impl Step {
    /// A `axis::node()` step without predicates; `.`, `..` and `//` expand to these.
    pub fn any_node(axis: Axis) -> Self {
        Step {
            axis,
            node_test: NodeTest::NodeType(NodeTypeTest::Node),
            predicates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Attribute,
    Namespace,
    Parent,
    Ancestor,
    AncestorOrSelf,
    SelfAxis,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
}

impl Axis {
    /// Axis names as written before `::`. Longer names precede their prefixes.
    pub const NAMES: [(&'static str, Axis); 13] = [
        ("ancestor-or-self", Axis::AncestorOrSelf),
        ("ancestor", Axis::Ancestor),
        ("attribute", Axis::Attribute),
        ("child", Axis::Child),
        ("descendant-or-self", Axis::DescendantOrSelf),
        ("descendant", Axis::Descendant),
        ("following-sibling", Axis::FollowingSibling),
        ("following", Axis::Following),
        ("namespace", Axis::Namespace),
        ("parent", Axis::Parent),
        ("preceding-sibling", Axis::PrecedingSibling),
        ("preceding", Axis::Preceding),
        ("self", Axis::SelfAxis),
    ];

    /// Reverse axes number their proximity positions backwards from the context node.
    pub fn is_reverse(&self) -> bool {
        matches!(
            self,
            Axis::Ancestor | Axis::AncestorOrSelf | Axis::Preceding | Axis::PrecedingSibling
        )
    }
}

/// The test a node must pass to be selected by a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    /// A QName test such as `foo` or `xsl:if`.
    Name(String),
    /// `*`
    Wildcard,
    /// `prefix:*`, holding the prefix.
    NamespaceWildcard(String),
    NodeType(NodeTypeTest),
    /// `processing-instruction('target')`
    ProcessingInstructionTarget(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTypeTest {
    Text,
    Node,
    Comment,
    ProcessingInstruction,
}

impl NodeTypeTest {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "text" => Some(NodeTypeTest::Text),
            "node" => Some(NodeTypeTest::Node),
            "comment" => Some(NodeTypeTest::Comment),
            "processing-instruction" => Some(NodeTypeTest::ProcessingInstruction),
            _ => None,
        }
    }
}
