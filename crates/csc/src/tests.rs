#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use statescript::{Instr, Line, Script, Value};
    use statescript_vm::{Exit, Vm};

    use crate::ast::*;
    use crate::error::{CompileError, LexErrorKind, TypeErrorKind};
    use crate::lexer::{self, TokenKind};
    use crate::{compile, compile_with, parse_source, CompileOptions};

    fn output(source: &str) -> String {
        compile(source).expect("compilation failed").to_string()
    }

    fn run_script(script: Script) -> (Vm, Exit) {
        let mut vm = Vm::new(script).expect("invalid script");
        vm.trace_enabled = true;
        let exit = vm.run().expect("runtime error");
        (vm, exit)
    }

    fn run(source: &str) -> (Vm, Exit) {
        run_script(compile(source).expect("compilation failed"))
    }

    fn kinds(source: &str) -> Vec<TokenKind> {
        lexer::lex(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn parse_one(source: &str) -> StmtKind {
        let mut program = parse_source(source).unwrap();
        assert_eq!(program.stmts.len(), 1);
        program.stmts.remove(0).kind
    }

    fn parse_error(source: &str) -> String {
        match parse_source(source) {
            Err(CompileError::Parse { msg, .. }) => msg,
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    fn type_errors(source: &str) -> Vec<TypeErrorKind> {
        match compile(source) {
            Err(CompileError::Type(errors)) => errors.0.into_iter().map(|e| e.kind).collect(),
            other => panic!("expected type errors, got {other:?}"),
        }
    }

    fn codegen_error(source: &str) -> String {
        match compile(source) {
            Err(CompileError::Codegen { msg, .. }) => msg,
            other => panic!("expected codegen error, got {other:?}"),
        }
    }

    fn line_index(script: &Script, instr: &Instr) -> usize {
        script
            .lines
            .iter()
            .position(|line| line == &Line::Instr(instr.clone()))
            .expect("instruction not emitted")
    }

    // --- Lexer Tests ---

    #[test]
    fn test_lex_keywords_and_identifiers() {
        assert_eq!(
            kinds("int intx waitfor wait spawnbot _tmp1"),
            vec![
                TokenKind::Int,
                TokenKind::Ident("intx".into()),
                TokenKind::WaitFor,
                TokenKind::Wait,
                TokenKind::SpawnBot,
                TokenKind::Ident("_tmp1".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_operators() {
        assert_eq!(
            kinds("== != <= >= && || ++ -- = < > ! ? : ."),
            vec![
                TokenKind::EqEq,
                TokenKind::BangEq,
                TokenKind::LtEq,
                TokenKind::GtEq,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::PlusPlus,
                TokenKind::MinusMinus,
                TokenKind::Eq,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::Bang,
                TokenKind::Question,
                TokenKind::Colon,
                TokenKind::Dot,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_numbers() {
        assert_eq!(
            kinds("42 2.5 0"),
            vec![
                TokenKind::IntLit(42),
                TokenKind::FloatLit(2.5),
                TokenKind::IntLit(0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_string_escapes() {
        let tokens = kinds(r#""a\nb\t\"q\"\\" 'it\'s' "\x""#);
        assert_eq!(tokens[0], TokenKind::StringLit("a\nb\t\"q\"\\".into()));
        assert_eq!(tokens[1], TokenKind::StringLit("it's".into()));
        assert_eq!(tokens[2], TokenKind::StringLit("x".into()));
    }

    #[test]
    fn test_lex_comments_are_tokens() {
        assert_eq!(
            kinds("// line note\n/* block\nnote */ x"),
            vec![
                TokenKind::Comment("line note".into()),
                TokenKind::Comment("block\nnote".into()),
                TokenKind::Ident("x".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_float_with_trailing_point() {
        assert_eq!(
            kinds("1. 7"),
            vec![TokenKind::FloatLit(1.0), TokenKind::IntLit(7), TokenKind::Eof]
        );
        assert_eq!(output("float x = 1.;"), "INIT x 1.0");
    }

    #[test]
    fn test_lex_float_rendering_relexes() {
        let original = kinds("0.00001 100000000000000000000.0 3.");
        let rendered: Vec<String> = original.iter().map(|k| k.to_string()).collect();
        assert_eq!(rendered[..3], ["0.00001", "100000000000000000000.0", "3.0"]);
        assert_eq!(kinds(&rendered.join(" ")), original);
    }

    #[test]
    fn test_lex_positions() {
        let tokens = lexer::lex("int x;\n  x++;").unwrap();
        let x = &tokens[3];
        assert_eq!(x.kind, TokenKind::Ident("x".into()));
        assert_eq!((x.line, x.col), (2, 3));
        assert_eq!(x.span, 9..10);
    }

    #[test]
    fn test_lex_ends_with_single_eof() {
        let tokens = lexer::lex("").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Eof);
    }

    #[test]
    fn test_lex_unterminated_string_reports_start() {
        let err = lexer::lex("int x = \"abc").unwrap_err();
        assert!(matches!(
            err,
            CompileError::Lex {
                kind: LexErrorKind::UnterminatedString,
                line: 1,
                col: 9
            }
        ));
    }

    #[test]
    fn test_lex_unterminated_comment() {
        let err = lexer::lex("x /* never closed").unwrap_err();
        assert!(matches!(
            err,
            CompileError::Lex {
                kind: LexErrorKind::UnterminatedComment,
                ..
            }
        ));
    }

    #[test]
    fn test_lex_unexpected_character() {
        let err = lexer::lex("int x = 5 @;").unwrap_err();
        assert!(matches!(
            err,
            CompileError::Lex {
                kind: LexErrorKind::UnexpectedCharacter('@'),
                line: 1,
                col: 11
            }
        ));
    }

    #[test]
    fn test_lex_integer_overflow() {
        let err = lexer::lex("99999999999999999999").unwrap_err();
        assert!(matches!(
            err,
            CompileError::Lex {
                kind: LexErrorKind::InvalidNumber,
                ..
            }
        ));
    }

    #[test]
    fn test_lex_canonical_round_trip() {
        let source = "int x = 5; // note\nwhile (x <= 10) { x++; } /* done */ s = 'a\\'b' + 2.5;";
        let original: Vec<TokenKind> = kinds(source)
            .into_iter()
            .filter(|k| !matches!(k, TokenKind::Comment(_)))
            .collect();
        let rendered: Vec<String> = original.iter().map(|k| k.to_string()).collect();
        assert_eq!(kinds(&rendered.join(" ")), original);
    }

    // --- Parser Tests ---

    #[test]
    fn test_parse_precedence() {
        let StmtKind::Expr(expr) = parse_one("x = 1 + 2 * 3;") else {
            panic!("expected expression statement");
        };
        let ExprKind::Assign { target, value } = expr.kind else {
            panic!("expected assignment");
        };
        assert_eq!(target, "x");
        let ExprKind::Binary { op, right, .. } = value.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, BinOp::Add);
        assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_parse_ternary_binds_loosest() {
        let StmtKind::Var(decl) = parse_one("int y = a || b ? 1 : 2;") else {
            panic!("expected declaration");
        };
        let value = decl.value.unwrap();
        let ExprKind::Ternary { condition, .. } = value.kind else {
            panic!("expected ternary");
        };
        assert!(matches!(condition.kind, ExprKind::Binary { op: BinOp::Or, .. }));
    }

    #[test]
    fn test_parse_postfix_chain() {
        let StmtKind::Expr(expr) = parse_one("player.stats.hp++;") else {
            panic!("expected expression statement");
        };
        let ExprKind::Unary { op, expr: operand } = expr.kind else {
            panic!("expected unary");
        };
        assert_eq!(op, UnaryOp::PostInc);
        assert_eq!(operand.slot_path().as_deref(), Some("player_stats_hp"));
    }

    #[test]
    fn test_parse_invalid_assignment_target() {
        assert_eq!(parse_error("arr[0] = 1;"), "invalid assignment target");
        assert_eq!(parse_error("a + 1 = 3;"), "invalid assignment target");
    }

    #[test]
    fn test_parse_error_names_expected_and_actual() {
        match parse_source("int x = ;") {
            Err(CompileError::Parse { line, col, msg }) => {
                assert_eq!((line, col), (1, 9));
                assert_eq!(msg, "expected expression, got `;`");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
        assert_eq!(parse_error("int x = 1"), "expected `;`, got end of input");
    }

    #[test]
    fn test_parse_reserved_words_are_not_identifiers() {
        assert_eq!(parse_error("int do = 1;"), "expected identifier, got `do`");
    }

    #[test]
    fn test_parse_const_and_array_declarations() {
        let StmtKind::Var(decl) = parse_one("const float RATE = 1.5;") else {
            panic!("expected declaration");
        };
        assert!(decl.is_const);
        assert_eq!(decl.ty, ScalarType::Float);

        let StmtKind::Array(decl) = parse_one("int[] xs = [1, 2, 3];") else {
            panic!("expected array declaration");
        };
        assert_eq!(decl.elem_ty, ScalarType::Int);
        assert!(matches!(decl.init.unwrap().kind, ExprKind::Array(ref e) if e.len() == 3));
    }

    #[test]
    fn test_parse_for_header_parts_are_optional() {
        let StmtKind::For {
            init,
            condition,
            step,
            ..
        } = parse_one("for (;;) { kill(); }")
        else {
            panic!("expected for");
        };
        assert!(init.is_none() && condition.is_none() && step.is_none());

        let StmtKind::For { init, .. } = parse_one("for (int i = 0; i < 3; i++) { }") else {
            panic!("expected for");
        };
        assert!(matches!(init, Some(ForInit::Decl(ref d)) if d.name == "i"));
    }

    #[test]
    fn test_parse_switch_cases() {
        let StmtKind::Switch { cases, default, .. } = parse_one(
            "switch (k) { case 1: a = 1; break; case 2: a = 2; b = 3; default: a = 0; }",
        ) else {
            panic!("expected switch");
        };
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[1].body.len(), 2);
        assert_eq!(default.map(|d| d.len()), Some(1));
        assert_eq!(
            parse_error("switch (k) { case 1: break; a = 1; }"),
            "expected `case`, `default` or `}`, got identifier `a`"
        );
    }

    #[test]
    fn test_parse_raw_block_keeps_source_lines() {
        let StmtKind::Raw(lines) = parse_one("raw {\n  SET a 1\n\n  GOTO end {a == 1}\n}") else {
            panic!("expected raw block");
        };
        assert_eq!(lines, vec!["SET a 1", "GOTO end {a == 1}"]);
    }

    #[test]
    fn test_parse_engine_operation_arity() {
        assert!(matches!(
            parse_one("spawnbot(\"guard\", spawn_a, \"hp\", 100);"),
            StmtKind::SpawnBot { ref attributes, .. } if attributes.len() == 2
        ));
        assert!(parse_error("moveto(door);").starts_with("`moveto` expects a prop and a location"));
        assert!(parse_error("spawnbot(\"guard\", loc, \"hp\");").contains("got 3 argument(s)"));
        assert!(parse_error("animate(door, pos);").starts_with("`animate` expects"));
        assert!(matches!(
            parse_one("wait(2, waited);"),
            StmtKind::Wait { var: Some(ref v), .. } if v == "waited"
        ));
    }

    #[test]
    fn test_parse_aggregates() {
        let StmtKind::Aggregate(class) = parse_one(
            "class Player { int health = 100; float[] pos; method hit(n) { health = health - n; } }",
        ) else {
            panic!("expected class");
        };
        assert_eq!(class.kind, AggregateKind::Class);
        assert_eq!(class.properties.len(), 2);
        assert_eq!(class.methods[0].params, vec!["n"]);

        assert_eq!(
            parse_error("struct P { method m() { } }"),
            "expected property, got `method`"
        );
    }

    #[test]
    fn test_parse_skips_comments() {
        let program = parse_source("// header\nint x = 1; /* trailing */").unwrap();
        assert_eq!(program.stmts.len(), 1);
    }

    // --- Type Checker Tests ---

    #[test]
    fn test_typeck_undefined_identifier() {
        assert_eq!(type_errors("x = 1;"), vec![TypeErrorKind::UndefinedIdentifier]);
    }

    #[test]
    fn test_typeck_incompatible_initializer() {
        assert_eq!(type_errors("int x = \"hi\";"), vec![TypeErrorKind::IncompatibleType]);
        assert!(compile("float f = 1;").is_ok());
        assert_eq!(type_errors("int n = 2.5;"), vec![TypeErrorKind::IncompatibleType]);
    }

    #[test]
    fn test_typeck_operands() {
        assert_eq!(type_errors("int x = 1 + \"a\";"), vec![TypeErrorKind::NonNumericOperand]);
        assert_eq!(type_errors("int c = \"a\" < 1;"), vec![TypeErrorKind::UnsupportedOperands]);
        assert!(compile("int same = \"a\" == \"b\";").is_ok());
    }

    #[test]
    fn test_typeck_indexing() {
        assert_eq!(
            type_errors("int[] a = [1, 2]; int x = a[1.5];"),
            vec![TypeErrorKind::NonIntegerIndex]
        );
        assert_eq!(type_errors("int n = 1; int x = n[0];"), vec![TypeErrorKind::NotIndexable]);
    }

    #[test]
    fn test_typeck_collects_all_errors() {
        match compile("a = 1;\nb = 2;") {
            Err(CompileError::Type(errors)) => {
                let lines: Vec<usize> = errors.0.iter().map(|e| e.line).collect();
                assert_eq!(lines, vec![1, 2]);
                assert!(errors.to_string().ends_with("(and 1 more)"));
            }
            other => panic!("expected type errors, got {other:?}"),
        }
    }

    #[test]
    fn test_typeck_runtime_bound_names_are_unknown() {
        assert!(compile("function f(a) { int y = a + 1; }").is_ok());
        assert!(compile("pop(v); int y = v;").is_ok());
        assert!(compile("wait(1, waited); int w = waited;").is_ok());
    }

    #[test]
    fn test_typecheck_can_be_skipped() {
        let options = CompileOptions { typecheck: false };
        let script = compile_with("x = 1;", &options).unwrap();
        assert!(script.to_string().contains("SET x 1"));
    }

    // --- Code Generation Tests ---

    #[test]
    fn test_codegen_top_level_init() {
        assert_eq!(output("int x = 5;"), "INIT x 5");
        assert_eq!(output("int x = -5;"), "INIT x -5");
        assert_eq!(output("int x;"), "INIT x 0");
    }

    #[test]
    fn test_codegen_composite_initializer() {
        let out = output("int x = 5 + 3;");
        assert!(out.contains("INIT x 0"));
        assert!(out.contains("SET x {5 + 3}"));
    }

    #[test]
    fn test_codegen_while_loop() {
        assert_eq!(
            output("int x = 0; while (x < 10) { x++; }"),
            "INIT x 0\n\
             \n\
             GOTO _main\n\
             \n\
             :_main\n\
             :_while_1\n\
             GOTO _while_end_2 {!(x < 10)}\n\
             INC x\n\
             GOTO _while_1\n\
             :_while_end_2"
        );
    }

    #[test]
    fn test_codegen_function_and_call() {
        assert_eq!(
            output("function test() { int x = 5; } test();"),
            "GOTO _main\n\
             \n\
             :test\n\
             SET x 5\n\
             RETURN\n\
             \n\
             :_main\n\
             CALL test"
        );
    }

    #[test]
    fn test_codegen_string_argument() {
        let out = output("test(\"hello\");");
        assert!(out.contains("PUSH [hello]\nCALL test"));
    }

    #[test]
    fn test_codegen_calling_convention() {
        let source = "function f(a, b) { int d = a - b; } f(10, 3);";
        let out = output(source);
        assert!(out.contains(":f\nPOP a\nPOP b\n"));
        assert!(out.contains("PUSH 3\nPUSH 10\nCALL f"));

        let (vm, exit) = run(source);
        assert_eq!(exit, Exit::EndOfScript);
        assert_eq!(vm.get("a"), Some(&Value::Int(10)));
        assert_eq!(vm.get("d"), Some(&Value::Int(7)));
    }

    #[test]
    fn test_codegen_if_without_else() {
        assert_eq!(
            output("int x = 1; if (x > 0) { x = 2; }"),
            "INIT x 1\n\
             \n\
             GOTO _main\n\
             \n\
             :_main\n\
             CALLIF _if_then_1 {x > 0}\n\
             GOTO _if_end_2\n\
             :_if_then_1\n\
             SET x 2\n\
             RETURN\n\
             :_if_end_2"
        );
    }

    #[test]
    fn test_codegen_if_else_pattern() {
        let script = compile("int x = 1; if (x > 0) { x = 2; } else { x = 3; }").unwrap();
        let instrs: Vec<String> = script.instrs().map(|i| i.to_string()).collect();
        let callif = instrs
            .iter()
            .position(|i| i.starts_with("CALLIF _if_then_"))
            .unwrap();
        assert!(instrs[callif + 1].starts_with("CALL _if_else_"));
        assert!(instrs[callif + 2].starts_with("GOTO _if_end_"));
    }

    #[test]
    fn test_codegen_if_else_runs_exactly_one_branch() {
        // The then-branch falsifies the condition; the else body must still
        // stay skipped after `CALL else` is reached.
        let source = "int x = 1; int r = 0; if (x > 0) { r = r + 1; x = 0; } else { r = r + 10; }";
        let (vm, _) = run(source);
        assert_eq!(vm.get("r"), Some(&Value::Int(1)));

        let source = "int x = -1; int r = 0; if (x > 0) { r = r + 1; } else { r = r + 10; }";
        let (vm, _) = run(source);
        assert_eq!(vm.get("r"), Some(&Value::Int(10)));
    }

    #[test]
    fn test_codegen_if_else_survives_recursion() {
        let source = "int n = 2; int r = 0; \
                      function f() { if (n > 0) { n = n - 1; f(); } else { r = r + 1; } } \
                      f();";
        let (vm, exit) = run(source);
        assert_eq!(exit, Exit::EndOfScript);
        assert_eq!(vm.get("r"), Some(&Value::Int(1)));
        assert_eq!(vm.get("n"), Some(&Value::Int(0)));
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn test_codegen_nested_if_else() {
        let source = "int a = 1; int b = 0; int r = 0; \
                      if (a == 1) { if (b == 1) { r = 1; } else { r = 2; } } else { r = 3; }";
        let script = compile(source).unwrap();
        assert!(script.label_index().is_ok());
        let (vm, _) = run_script(script);
        assert_eq!(vm.get("r"), Some(&Value::Int(2)));
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn test_codegen_false_loop_guard_skips_body() {
        let script = compile("int x = 10; int hits = 0; while (x < 10) { hits++; }").unwrap();
        let body = line_index(&script, &Instr::Inc("hits".into()));
        let (vm, _) = run_script(script);
        assert!(!vm.trace.contains(&body));
        assert_eq!(vm.get("hits"), Some(&Value::Int(0)));

        let script = compile("int n = 0; for (int i = 5; i < 3; i++) { n++; }").unwrap();
        let body = line_index(&script, &Instr::Inc("n".into()));
        let step = line_index(&script, &Instr::Inc("i".into()));
        let (vm, _) = run_script(script);
        assert!(!vm.trace.contains(&body));
        assert!(!vm.trace.contains(&step));
    }

    #[test]
    fn test_codegen_for_loop_runs_step_after_body() {
        let source = "int total = 0; for (int i = 0; i < 4; i++) { total = total + i; }";
        let script = compile(source).unwrap();
        let body = line_index(
            &script,
            &Instr::Set {
                name: "total".into(),
                value: statescript::Operand::Expr(statescript::Expr::binary(
                    statescript::BinOp::Add,
                    statescript::Expr::name("total"),
                    statescript::Expr::name("i"),
                )),
            },
        );
        let step = line_index(&script, &Instr::Inc("i".into()));
        assert!(step > body);

        let (vm, _) = run_script(script);
        assert_eq!(vm.get("total"), Some(&Value::Int(6)));
        assert_eq!(vm.get("i"), Some(&Value::Int(4)));
    }

    #[test]
    fn test_codegen_labels_are_unique() {
        let source = "int i = 0; while (i < 2) { i++; } while (i < 4) { i++; } \
                      if (i == 4) { i = 0; } if (i == 4) { i = 0; }";
        let script = compile(source).unwrap();
        let labels: Vec<&str> = script.labels().collect();
        let unique: HashSet<&str> = labels.iter().copied().collect();
        assert_eq!(labels.len(), unique.len());
        assert!(script.label_index().is_ok());
    }

    #[test]
    fn test_codegen_nested_loops_have_distinct_labels() {
        let source = "int i = 0; int j = 0; int hits = 0; \
                      while (i < 3) { j = 0; while (j < 2) { if (j == 1) { if (i == 1) { hits++; } } j++; } i++; }";
        let script = compile(source).unwrap();
        let labels: Vec<&str> = script.labels().collect();
        let unique: HashSet<&str> = labels.iter().copied().collect();
        assert_eq!(labels.len(), unique.len());
        assert_eq!(labels.iter().filter(|l| l.starts_with("_while_end_")).count(), 2);

        let (vm, _) = run_script(script);
        assert_eq!(vm.get("hits"), Some(&Value::Int(1)));
        assert_eq!(vm.get("i"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_codegen_switch_matches_one_case() {
        let switch = "switch (k) { case 1: r = 10; break; case 2: r = 20; break; default: r = 99; }";
        let (vm, _) = run(&format!("int k = 2; int r = 0; {switch}"));
        assert_eq!(vm.get("r"), Some(&Value::Int(20)));

        let (vm, _) = run(&format!("int k = 5; int r = 0; {switch}"));
        assert_eq!(vm.get("r"), Some(&Value::Int(99)));
    }

    #[test]
    fn test_codegen_switch_survives_recursion() {
        let source = "int n = 1; int r = 0; \
                      function f() { switch (n) { case 1: n = 0; f(); break; default: r = r + 1; } } \
                      f();";
        let (vm, _) = run(source);
        assert_eq!(vm.get("r"), Some(&Value::Int(1)));
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn test_codegen_switch_cases_do_not_fall_through() {
        let source = "int k = 1; int r = 0; switch (k) { case 1: r = r + 1; case 2: r = r + 10; }";
        let (vm, _) = run(source);
        assert_eq!(vm.get("r"), Some(&Value::Int(1)));
        assert!(output(source).contains("SET _switch_1 k"));
    }

    #[test]
    fn test_codegen_arrays_flatten() {
        let source = "int[] a = [4, 5, 6]; int x = a[1] + a.length;";
        let out = output(source);
        for line in ["INIT a_0 4", "INIT a_1 5", "INIT a_2 6", "INIT a_length 3", "SET x {a_1 + a_length}"] {
            assert!(out.contains(line), "missing {line:?} in\n{out}");
        }
        let (vm, _) = run(source);
        assert_eq!(vm.get("x"), Some(&Value::Int(8)));
    }

    #[test]
    fn test_codegen_rejects_non_constant_index() {
        let msg = codegen_error("int[] a = [1, 2]; int i = 0; int x = a[i];");
        assert!(msg.contains("array `a` is indexed by a non-constant expression"));
    }

    #[test]
    fn test_codegen_rejects_call_as_value() {
        let msg = codegen_error("function f() { } int x = f();");
        assert!(msg.contains("call to `f` used as a value"));
    }

    #[test]
    fn test_codegen_member_access_flattens() {
        let out = output("int player_stats_hp = 5; int y = player.stats.hp; player.stats.hp--;");
        assert!(out.contains("SET y player_stats_hp"));
        assert!(out.contains("DEC player_stats_hp"));
    }

    #[test]
    fn test_codegen_rejects_unlowerable_shapes() {
        assert!(codegen_error("function f() { if (1) { return; } }").contains("`return` inside"));
        assert!(codegen_error("int x = 0; int y = x++;").contains("can only be used as a statement"));
        assert!(codegen_error("int x = 0; x + 1;").contains("no effect"));
        assert!(codegen_error("function f(a) { } f(1, 2);").contains("takes 1 argument(s), got 2"));
        assert!(codegen_error("function f() { } function f() { }").contains("declared more than once"));
    }

    #[test]
    fn test_codegen_rejects_duplicate_labels() {
        assert!(codegen_error("function foo() { } label: foo\nkill();")
            .contains("label `foo` is defined more than once"));
        assert!(codegen_error("label: top\nkill();\nlabel: top\nkill();")
            .contains("label `top` is defined more than once"));
        assert!(codegen_error("label: _main\nkill();").contains("label `_main`"));
    }

    #[test]
    fn test_codegen_rejects_unprintable_strings() {
        assert!(codegen_error("push(\"a]b\");").contains("cannot be emitted"));
        assert!(codegen_error("set(msg, \"two\\nlines\");").contains("line break"));
    }

    #[test]
    fn test_codegen_floats_render_in_decimal() {
        let out = output("float f = 0.00001; float g = 100000000000000000000.0;");
        assert_eq!(out, "INIT f 0.00001\nINIT g 100000000000000000000.0");
    }

    #[test]
    fn test_codegen_aggregates_emit_nothing() {
        assert_eq!(output("struct Point { int x; int y; }"), "");
        assert_eq!(output("class Door { int open; method toggle() { open = 1; } }"), "");
    }

    #[test]
    fn test_codegen_nested_function_is_skipped_inline() {
        let out = output("function outer() { function inner(a) { } inner(1); }");
        assert!(out.contains("GOTO _fn_skip_1\n:inner\nPOP a\nRETURN\n:_fn_skip_1\nPUSH 1\nCALL inner"));
    }

    #[test]
    fn test_codegen_engine_operations() {
        let source = "int ready = 1;\n\
                      spawnbot(\"guard\", spawn_a, \"hp\", 100);\n\
                      moveto(door, \"open\");\n\
                      animate(door, pos, 1.5);\n\
                      delete(door);\n\
                      wait(2, waited);\n\
                      waitfor(ready == 1);\n\
                      push(5);\n\
                      peek(top);\n\
                      pop(top);\n\
                      set(flag, ready + 1);\n\
                      kill();";
        let out = output(source);
        for line in [
            "SPAWNBOT [guard] spawn_a [hp] 100",
            "MOVETO door [open]",
            "ANIMATE door pos 1.5",
            "DELETE door",
            "WAIT 2 waited",
            "WAITFOR {ready == 1}",
            "PUSH 5",
            "PEEK top",
            "POP top",
            "SET flag {ready + 1}",
            "KILL",
        ] {
            assert!(out.contains(line), "missing {line:?} in\n{out}");
        }
    }

    #[test]
    fn test_codegen_thread_to_label() {
        let source = "label: patrol\nkill();\nthread(patrol, 3);";
        let out = output(source);
        assert!(out.contains(":patrol"));
        assert!(out.contains("THREAD patrol 3"));
    }

    #[test]
    fn test_codegen_labels_and_guarded_goto() {
        let source = "int x = 0; label: top\nx++; goto top if (x < 3);";
        let out = output(source);
        assert!(out.contains(":top\nINC x\nGOTO top {x < 3}"));
        let (vm, _) = run(source);
        assert_eq!(vm.get("x"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_codegen_raw_block_passthrough() {
        let script = compile("raw {\n  SET a 1\n  GOTO end {a == 1}\n}").unwrap();
        assert!(script.lines.contains(&Line::Raw("SET a 1".into())));
        assert!(script.to_string().contains("SET a 1\nGOTO end {a == 1}"));
    }

    #[test]
    fn test_codegen_ternary() {
        let source = "int a = 1; int b = a > 0 ? 10 : 20;";
        assert!(output(source).contains("SET b {(a > 0) ? 10 : 20}"));
        let (vm, _) = run(source);
        assert_eq!(vm.get("b"), Some(&Value::Int(10)));
    }

    #[test]
    fn test_codegen_is_deterministic() {
        let source = "int i = 0; while (i < 3) { if (i == 1) { i = i + 2; } else { i++; } }";
        assert_eq!(output(source), output(source));
        let (vm, exit) = run(source);
        assert_eq!(exit, Exit::EndOfScript);
        assert_eq!(vm.get("i"), Some(&Value::Int(3)));
    }
}
