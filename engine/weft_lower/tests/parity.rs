//! Backend parity: every template in the compiling backend's subset must
//! render identically through the tree-walking backend and the compiled
//! form, output and exports both.

use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use weft_interp::Interpreter;
use weft_ir::{BinaryOp, CmpOp, Expr, Operand, Stmt, Target, Template};
use weft_lower::{compile, lower, CodeInput};
use weft_runtime::{
    Config, LoopContext, LoopState, Rendered, RuntimeError, Value, ValueMap,
};

fn vars(pairs: Vec<(&str, Value)>) -> ValueMap {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect()
}

fn int_list(values: &[i64]) -> Value {
    Value::list(values.iter().copied().map(Value::Int).collect())
}

/// Render through both backends, assert identical results, return them.
fn parity_with(config: &Config, template: &Template, vars: ValueMap) -> Rendered {
    let walked = Interpreter::new(config.clone().shared())
        .render(template, vars.clone())
        .unwrap();
    let compiled = weft_lower::run(
        CodeInput::Tree(template),
        config.clone().shared(),
        vars,
    )
    .unwrap();
    assert_eq!(walked, compiled);
    walked
}

fn parity(template: &Template, vars: ValueMap) -> Rendered {
    parity_with(&Config::new(), template, vars)
}

/// Both backends must fail with the same error.
fn parity_err(config: &Config, template: &Template, vars: ValueMap) -> RuntimeError {
    let walked = Interpreter::new(config.clone().shared())
        .render(template, vars.clone())
        .unwrap_err();
    let compiled =
        weft_lower::run(CodeInput::Tree(template), config.clone().shared(), vars).unwrap_err();
    assert_eq!(walked, compiled);
    walked
}

fn text(s: &str) -> Expr {
    Expr::TemplateData(s.to_owned())
}

#[test]
fn test_text_and_loop_output() {
    let template = Template::new(vec![
        Stmt::Output(vec![text("before|")]),
        Stmt::For {
            target: Target::name("item"),
            iter: Expr::name("seq"),
            body: vec![Stmt::Output(vec![text("<"), Expr::name("item"), text(">")])],
            orelse: vec![],
        },
        Stmt::Output(vec![text("|after")]),
    ]);
    let rendered = parity(&template, vars(vec![("seq", int_list(&[0, 1, 2]))]));
    assert_eq!(rendered.output, "before|<0><1><2>|after");
}

#[test]
fn test_loop_attributes() {
    let attr = |name: &str| Expr::attr(Expr::name("loop"), name);
    let template = Template::new(vec![Stmt::For {
        target: Target::name("item"),
        iter: Expr::name("seq"),
        body: vec![Stmt::Output(vec![
            attr("index"),
            text("/"),
            attr("length"),
            text(":"),
            attr("first"),
            text(","),
            attr("last"),
            text(";"),
        ])],
        orelse: vec![],
    }]);
    let rendered = parity(&template, vars(vec![("seq", int_list(&[9, 9, 9]))]));
    assert_eq!(
        rendered.output,
        "1/3:true,false;2/3:false,false;3/3:false,true;"
    );
}

#[test]
fn test_loop_cycle() {
    let template = Template::new(vec![Stmt::For {
        target: Target::name("item"),
        iter: Expr::name("seq"),
        body: vec![Stmt::Output(vec![
            Expr::call(
                Expr::attr(Expr::name("loop"), "cycle"),
                vec![Expr::constant("a"), Expr::constant("b")],
            ),
            text(";"),
        ])],
        orelse: vec![],
    }]);
    let rendered = parity(&template, vars(vec![("seq", int_list(&[1, 2, 3]))]));
    assert_eq!(rendered.output, "a;b;a;");
}

fn unpack_template() -> Template {
    Template::new(vec![Stmt::For {
        target: Target::Tuple(vec![Target::name("item"), Target::name("whoop")]),
        iter: Expr::name("seq"),
        body: vec![Stmt::Output(vec![
            Expr::name("item"),
            text(";"),
            Expr::name("whoop"),
            text("|"),
        ])],
        orelse: vec![],
    }])
}

#[test]
fn test_lenient_unpacking() {
    let excess = Value::list(vec![Value::tuple(vec![
        Value::Int(1),
        Value::Int(2),
        Value::Int(3),
    ])]);
    let rendered = parity(&unpack_template(), vars(vec![("seq", excess)]));
    assert_eq!(rendered.output, "1;2|");

    let mut config = Config::new();
    config.set_undefined(|name| Value::str(format!("<{name}>")));
    let shortfall = Value::list(vec![Value::tuple(vec![Value::Int(1)])]);
    let rendered = parity_with(&config, &unpack_template(), vars(vec![("seq", shortfall)]));
    assert_eq!(rendered.output, "1;<whoop>|");
}

#[test]
fn test_noniter_unpacking_policies() {
    let mut allowing = Config::new();
    allowing.allow_noniter_unpacking = true;
    allowing.set_undefined(|name| Value::str(format!("<{name}>")));
    let rendered = parity_with(
        &allowing,
        &unpack_template(),
        vars(vec![("seq", int_list(&[1, 2]))]),
    );
    assert_eq!(rendered.output, "<item>;<whoop>|<item>;<whoop>|");

    let err = parity_err(
        &Config::new(),
        &unpack_template(),
        vars(vec![("seq", int_list(&[1]))]),
    );
    assert_eq!(err, RuntimeError::NotIterable { type_name: "int" });
}

#[test]
fn test_strict_unpacking_shape_mismatch() {
    let mut config = Config::new();
    config.strict_tuple_unpacking = true;
    let seq = Value::list(vec![Value::tuple(vec![
        Value::Int(1),
        Value::Int(2),
        Value::Int(3),
    ])]);
    let err = parity_err(&config, &unpack_template(), vars(vec![("seq", seq)]));
    assert_eq!(
        err,
        RuntimeError::ShapeMismatch {
            expected: 2,
            got: 3
        }
    );
}

#[test]
fn test_scope_frames() {
    let template = Template::new(vec![
        Stmt::Assign {
            target: Target::name("a"),
            value: Expr::constant(42),
        },
        Stmt::Output(vec![Expr::name("a"), text(";")]),
        Stmt::Scope(vec![
            Stmt::Assign {
                target: Target::name("a"),
                value: Expr::constant(23),
            },
            Stmt::Output(vec![Expr::name("a"), text(";")]),
        ]),
        Stmt::Output(vec![Expr::name("a")]),
    ]);
    let rendered = parity(&template, ValueMap::default());
    assert_eq!(rendered.output, "42;23;42");
}

#[test]
fn test_boolean_and_division() {
    let template = Template::new(vec![Stmt::Output(vec![
        Expr::And {
            left: Box::new(Expr::constant(0)),
            right: Box::new(Expr::constant(42)),
        },
        text(";"),
        Expr::Or {
            left: Box::new(Expr::constant(0)),
            right: Box::new(Expr::constant(23)),
        },
        text(";"),
        Expr::binary(BinaryOp::Div, Expr::constant(42), Expr::constant(2)),
        text(";"),
        Expr::binary(BinaryOp::FloorDiv, Expr::constant(42), Expr::constant(4)),
    ])]);
    let rendered = parity(&template, ValueMap::default());
    assert_eq!(rendered.output, "false;23;21.0;10");
}

#[test]
fn test_chained_comparison_and_membership() {
    let template = Template::new(vec![Stmt::Output(vec![
        Expr::compare(
            Expr::constant(1),
            vec![
                Operand {
                    op: CmpOp::Lt,
                    expr: Expr::name("x"),
                },
                Operand {
                    op: CmpOp::Lt,
                    expr: Expr::constant(10),
                },
            ],
        ),
        text(";"),
        Expr::compare(
            Expr::constant(2),
            vec![Operand {
                op: CmpOp::In,
                expr: Expr::name("seq"),
            }],
        ),
    ])]);
    let rendered = parity(
        &template,
        vars(vec![("x", Value::Int(5)), ("seq", int_list(&[1, 2, 3]))]),
    );
    assert_eq!(rendered.output, "true;true");
}

#[test]
fn test_break_continue_and_for_else() {
    let index0 = || Expr::attr(Expr::name("loop"), "index0");
    let breaking = Template::new(vec![Stmt::For {
        target: Target::name("item"),
        iter: Expr::name("seq"),
        body: vec![
            Stmt::If {
                test: Expr::compare(
                    index0(),
                    vec![Operand {
                        op: CmpOp::Eq,
                        expr: Expr::constant(2),
                    }],
                ),
                body: vec![Stmt::Break],
                orelse: vec![],
            },
            Stmt::Output(vec![Expr::name("item")]),
        ],
        orelse: vec![],
    }]);
    let rendered = parity(&breaking, vars(vec![("seq", int_list(&[5, 6, 7, 8]))]));
    assert_eq!(rendered.output, "56");

    let skipping = Template::new(vec![Stmt::For {
        target: Target::name("item"),
        iter: Expr::name("seq"),
        body: vec![
            Stmt::If {
                test: Expr::compare(
                    Expr::binary(BinaryOp::Mod, index0(), Expr::constant(2)),
                    vec![Operand {
                        op: CmpOp::Eq,
                        expr: Expr::constant(0),
                    }],
                ),
                body: vec![Stmt::Continue],
                orelse: vec![],
            },
            Stmt::Output(vec![Expr::name("item")]),
        ],
        orelse: vec![],
    }]);
    let rendered = parity(&skipping, vars(vec![("seq", int_list(&[5, 6, 7, 8]))]));
    assert_eq!(rendered.output, "68");

    let with_else = Template::new(vec![Stmt::For {
        target: Target::name("item"),
        iter: Expr::name("seq"),
        body: vec![Stmt::Output(vec![Expr::name("item")])],
        orelse: vec![Stmt::Output(vec![text("nothing")])],
    }]);
    let rendered = parity(&with_else, vars(vec![("seq", int_list(&[]))]));
    assert_eq!(rendered.output, "nothing");
}

#[test]
fn test_blocks() {
    let template = Template::new(vec![
        Stmt::Output(vec![text("[")]),
        Stmt::Block {
            name: "body".to_owned(),
            body: vec![Stmt::Output(vec![Expr::name("x"), text("!")])],
        },
        Stmt::Output(vec![text("]")]),
    ]);
    let rendered = parity(&template, vars(vec![("x", Value::Int(7))]));
    assert_eq!(rendered.output, "[7!]");
}

#[test]
fn test_filters_tests_and_filter_region() {
    let mut config = Config::new();
    config.add_filter("upper", |value, _args| {
        Ok(Value::str(value.to_string().to_uppercase()))
    });
    config.add_test("even", |value, _args| match value {
        Value::Int(i) => Ok(Value::Bool(i % 2 == 0)),
        _ => Ok(Value::Bool(false)),
    });

    let template = Template::new(vec![
        Stmt::Output(vec![
            Expr::Filter {
                value: Box::new(Expr::name("name")),
                name: "upper".to_owned(),
                args: vec![],
            },
            text(";"),
            Expr::Test {
                value: Box::new(Expr::constant(3)),
                name: "even".to_owned(),
                args: vec![],
            },
            text(";"),
        ]),
        Stmt::FilterBlock {
            name: "upper".to_owned(),
            args: vec![],
            body: vec![Stmt::Output(vec![text("hi "), Expr::name("name")])],
        },
    ]);
    let rendered = parity_with(&config, &template, vars(vec![("name", Value::str("peter"))]));
    assert_eq!(rendered.output, "PETER;false;HI PETER");
}

#[test]
fn test_exports_parity() {
    let template = Template::new(vec![
        Stmt::Assign {
            target: Target::name("a"),
            value: Expr::constant(42),
        },
        Stmt::Scope(vec![Stmt::Assign {
            target: Target::name("hidden"),
            value: Expr::constant(1),
        }]),
        Stmt::Assign {
            target: Target::Tuple(vec![Target::name("b"), Target::name("c")]),
            value: Expr::Tuple(vec![Expr::constant(1), Expr::constant(2)]),
        },
    ]);
    let rendered = parity(&template, ValueMap::default());
    assert_eq!(rendered.exports.get("a"), Some(&Value::Int(42)));
    assert_eq!(rendered.exports.get("b"), Some(&Value::Int(1)));
    assert_eq!(rendered.exports.get("c"), Some(&Value::Int(2)));
    assert_eq!(rendered.exports.get("hidden"), None);
}

#[test]
fn test_nested_loop_parent_access() {
    let mut config = Config::new();
    config.forloop_parent_access = true;
    let template = Template::new(vec![Stmt::For {
        target: Target::name("row"),
        iter: Expr::name("rows"),
        body: vec![Stmt::For {
            target: Target::name("cell"),
            iter: Expr::name("row"),
            body: vec![Stmt::Output(vec![
                Expr::attr(Expr::attr(Expr::name("loop"), "parent"), "index0"),
                text(":"),
                Expr::name("cell"),
                text(";"),
            ])],
            orelse: vec![],
        }],
        orelse: vec![],
    }]);
    let rows = Value::list(vec![int_list(&[1, 2]), int_list(&[3])]);
    let rendered = parity_with(&config, &template, vars(vec![("rows", rows)]));
    assert_eq!(rendered.output, "0:1;0:2;1:3;");
}

#[test]
fn test_conditional_expression_and_arithmetic() {
    let template = Template::new(vec![Stmt::Output(vec![
        Expr::Cond {
            test: Box::new(Expr::name("flag")),
            then: Box::new(Expr::constant("yes")),
            otherwise: Box::new(Expr::constant("no")),
        },
        text(";"),
        Expr::binary(
            BinaryOp::Add,
            Expr::binary(BinaryOp::Mul, Expr::constant(6), Expr::constant(7)),
            Expr::constant(0),
        ),
    ])]);
    let rendered = parity(&template, vars(vec![("flag", Value::Int(0))]));
    assert_eq!(rendered.output, "no;42");
}

#[test]
fn test_stage_inputs_agree() {
    let template = Template::new(vec![
        Stmt::Output(vec![text("x="), Expr::name("x")]),
        Stmt::For {
            target: Target::name("item"),
            iter: Expr::name("seq"),
            body: vec![Stmt::Output(vec![text(","), Expr::name("item")])],
            orelse: vec![],
        },
    ]);
    let config = Config::new().shared();
    let inputs = vars(vec![("x", Value::Int(1)), ("seq", int_list(&[2, 3]))]);

    let from_tree =
        weft_lower::run(CodeInput::Tree(&template), config.clone(), inputs.clone()).unwrap();
    let lowered = lower(&template).unwrap();
    let from_lowered = weft_lower::run(
        CodeInput::Lowered(&lowered),
        config.clone(),
        inputs.clone(),
    )
    .unwrap();
    let executable = compile(&lowered);
    let from_compiled =
        weft_lower::run(CodeInput::Compiled(&executable), config, inputs).unwrap();

    assert_eq!(from_tree, from_lowered);
    assert_eq!(from_lowered, from_compiled);
    assert_eq!(from_tree.output, "x=1,2,3");
}

#[test]
fn test_custom_loop_context() {
    // a policy-supplied context adds an attribute and delegates the rest
    struct TaggedLoop {
        inner: LoopContext,
    }

    impl LoopState for TaggedLoop {
        fn next_item(&mut self) -> Option<Value> {
            self.inner.next_item()
        }

        fn attr(&mut self, name: &str) -> Option<Value> {
            match name {
                "tag" => Some(Value::str("custom")),
                _ => self.inner.attr(name),
            }
        }
    }

    let mut config = Config::new();
    config.set_wrap_loop(|iter, parent| {
        Rc::new(RefCell::new(TaggedLoop {
            inner: LoopContext::new(iter, parent),
        }))
    });

    let template = Template::new(vec![Stmt::For {
        target: Target::name("item"),
        iter: Expr::name("seq"),
        body: vec![Stmt::Output(vec![
            Expr::attr(Expr::name("loop"), "tag"),
            text(":"),
            Expr::attr(Expr::name("loop"), "index"),
            text(";"),
        ])],
        orelse: vec![],
    }]);
    let rendered = parity_with(&config, &template, vars(vec![("seq", int_list(&[9, 9]))]));
    assert_eq!(rendered.output, "custom:1;custom:2;");
}

#[test]
fn test_undefined_renders_empty_in_both() {
    let template = Template::new(vec![Stmt::Output(vec![
        text("["),
        Expr::name("ghost"),
        Expr::attr(Expr::name("ghost"), "attr"),
        text("]"),
    ])]);
    let rendered = parity(&template, ValueMap::default());
    assert_eq!(rendered.output, "[]");
}
