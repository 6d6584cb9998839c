use texdeck::latex::macros::{extract_macros, force_macros_mathmode, macro_lines, Macro, REQUIRED_MACROS};
use texdeck::latex::tree::TexTree;

fn user_macro(name: &str, arg_count: usize) -> Macro {
    Macro {
        name: name.to_string(),
        arg_count,
        replacement: String::new(),
        definition: format!("\\newcommand{{\\{}}}{{}}", name),
    }
}

#[test]
fn test_extract_macros_from_every_spelling() {
    let tree = TexTree::parse(
        r"\newcommand{\foo}{bar}\renewcommand{\baz}[1]{#1!}\def{\qux}{q}\providecommand*{\st}{s}\DeclareRobustCommand{\rb}{$r$}",
    )
    .unwrap();
    let macros = extract_macros(&tree);

    let names: Vec<&str> = macros.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["foo", "baz", "qux", "st", "rb"]);

    let baz = &macros[1];
    assert_eq!(baz.arg_count, 1);
    assert_eq!(baz.replacement, "#1!");
    assert_eq!(baz.definition, r"\newcommand{\baz}[1]{#1!}");

    assert_eq!(macros[2].definition, r"\newcommand{\qux}{q}");
    // math delimiters are dropped from the snippet
    assert_eq!(macros[4].definition, r"\newcommand{\rb}{r}");
}

#[test]
fn test_repaired_def_with_parameters() {
    let tree = TexTree::parse(r"\gdef{\pair}[2]{(#1,#2)}").unwrap();
    let macros = extract_macros(&tree);
    assert_eq!(macros.len(), 1);
    assert_eq!(macros[0].arg_count, 2);
    assert_eq!(macros[0].definition, r"\newcommand{\pair}[2]{(#1,#2)}");
}

#[test]
fn test_macro_lines_start_with_required_macros() {
    let lines = macro_lines(&[user_macro("msun", 0)]);
    assert_eq!(lines.len(), REQUIRED_MACROS.len() + 1);
    assert_eq!(lines[0], r"$\newcommand{\ensuremath}{}$");
    assert_eq!(lines[lines.len() - 1], r"$\newcommand{\msun}{}$");
    assert!(lines.iter().all(|line| line.starts_with('$') && line.ends_with('$')));
}

#[test]
fn test_force_macros_mathmode() {
    let macros = vec![user_macro("foo", 0), user_macro("bar", 1)];
    let text = r"A \foo and \bar{x}{y} and $\foo$ and \foobar and \(\foo\)";
    assert_eq!(
        force_macros_mathmode(text, &macros),
        r"A $\foo$ and $\bar{x}${y} and $\foo$ and \foobar and \(\foo\)"
    );
}

#[test]
fn test_force_macros_mathmode_is_idempotent() {
    let macros = vec![user_macro("msun", 0), user_macro("ion", 2)];
    let text = r"1\msun{} of \ion{Fe}{ii} in $10\msun$";
    let once = force_macros_mathmode(text, &macros);
    assert_eq!(once, r"1$\msun${} of $\ion{Fe}{ii}$ in $10\msun$");
    assert_eq!(force_macros_mathmode(&once, &macros), once);
}

#[test]
fn test_force_macros_mathmode_without_macros() {
    assert_eq!(force_macros_mathmode(r"\foo", &[]), r"\foo");
}
