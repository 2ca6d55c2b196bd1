//! Interactive client menu

use std::io::{self, BufRead, Write};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuChoice {
    Upload(String),
    Download(String),
    Exit,
    Invalid(String),
}

pub fn print_menu<O: Write>(out: &mut O) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "Choose an option:")?;
    writeln!(out, "1. Upload a file")?;
    writeln!(out, "2. Download a file")?;
    writeln!(out, "3. Exit")?;
    write!(out, "Enter choice: ")?;
    out.flush()
}

/// Prompt until a full choice is read. `None` on end of input.
pub fn prompt_choice<I: BufRead, O: Write>(input: &mut I, out: &mut O) -> io::Result<Option<MenuChoice>> {
    print_menu(out)?;
    let Some(choice) = next_word(input)? else {
        return Ok(None);
    };
    let choice = match choice.as_str() {
        "1" => {
            write!(out, "Enter the path of the file to upload: ")?;
            out.flush()?;
            match next_word(input)? {
                Some(path) => MenuChoice::Upload(path),
                None => return Ok(None),
            }
        }
        "2" => {
            write!(out, "Enter the filename to download: ")?;
            out.flush()?;
            match next_word(input)? {
                Some(name) => MenuChoice::Download(name),
                None => return Ok(None),
            }
        }
        "3" => MenuChoice::Exit,
        other => MenuChoice::Invalid(other.to_string()),
    };
    Ok(Some(choice))
}

// First non-blank line, trimmed
fn next_word<I: BufRead>(input: &mut I) -> io::Result<Option<String>> {
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            return Ok(Some(trimmed.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn choices(script: &str) -> Vec<MenuChoice> {
        let mut input = Cursor::new(script.as_bytes().to_vec());
        let mut out = Vec::new();
        let mut seen = Vec::new();
        while let Some(c) = prompt_choice(&mut input, &mut out).unwrap() {
            seen.push(c);
        }
        seen
    }

    #[test]
    fn reads_a_session() {
        assert_eq!(
            choices("1\n./report.txt\n\n2\nreport.txt\n7\n3\n"),
            vec![
                MenuChoice::Upload("./report.txt".into()),
                MenuChoice::Download("report.txt".into()),
                MenuChoice::Invalid("7".into()),
                MenuChoice::Exit,
            ]
        );
    }

    #[test]
    fn eof_mid_prompt_ends_session() {
        assert_eq!(choices("2\n"), vec![]);
        assert_eq!(choices(""), vec![]);
    }

    #[test]
    fn menu_text() {
        let mut out = Vec::new();
        print_menu(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("1. Upload a file"));
        assert!(text.ends_with("Enter choice: "));
    }
}
