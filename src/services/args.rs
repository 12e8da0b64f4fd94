/// 按 shell 风格拆分一行参数
///
/// 支持单双引号包裹空白；反斜杠只转义引号和反斜杠本身，其余情况原样保留（兼容 Windows 路径）。
pub fn split_args(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    // 出现过引号的参数即使为空也保留
    let mut quoted = false;
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        match (ch, quote) {
            ('\\', _) => match chars.peek() {
                Some(&next @ ('"' | '\'' | '\\')) => {
                    current.push(next);
                    chars.next();
                }
                _ => current.push(ch),
            },
            ('"' | '\'', None) => {
                quote = Some(ch);
                quoted = true;
            }
            (c, Some(q)) if c == q => quote = None,
            (' ' | '\t', None) => {
                if !current.is_empty() || quoted {
                    args.push(std::mem::take(&mut current));
                    quoted = false;
                }
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() || quoted {
        args.push(current);
    }
    args
}

/// 对每一项分别拆分后拼接
pub fn split_args_vec<S: AsRef<str>>(args: &[S]) -> Vec<String> {
    args.iter().flat_map(|a| split_args(a.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(
            split_args("  --vfs-cache-mode   full\t--read-only "),
            vec!["--vfs-cache-mode", "full", "--read-only"]
        );
        assert!(split_args("   ").is_empty());
    }

    #[test]
    fn quotes_keep_spaces() {
        assert_eq!(
            split_args(r#"--volname "My Drive" --opt 'a b'"#),
            vec!["--volname", "My Drive", "--opt", "a b"]
        );
        assert_eq!(split_args(r#""it's""#), vec!["it's"]);
    }

    #[test]
    fn empty_quotes_are_an_argument() {
        assert_eq!(split_args(r#"--opt "" --b"#), vec!["--opt", "", "--b"]);
        assert_eq!(split_args("--opt ''"), vec!["--opt", ""]);
    }

    #[test]
    fn backslash_escapes_only_quotes() {
        assert_eq!(split_args(r#"say \"hi\""#), vec!["say", "\"hi\""]);
        assert_eq!(split_args(r"C:\mnt\drive"), vec![r"C:\mnt\drive"]);
        assert_eq!(split_args(r"a\\b"), vec![r"a\b"]);
    }

    #[test]
    fn vec_flattens_each_entry() {
        let flags = vec!["--a 1".to_string(), "--b".to_string()];
        assert_eq!(split_args_vec(&flags), vec!["--a", "1", "--b"]);
    }
}
