//! Interactive demo: a small echo loop over the readline façade.
//!
//! Try the keys: C-r searches history, Tab completes a handful of words,
//! M-. yanks the last word of the previous line, C-d on an empty line
//! quits.

#[cfg(unix)]
fn main() {
    use relish::{Error, Readline};

    let mut rl = match Readline::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("relish-demo: {e}");
            std::process::exit(1);
        }
    };

    const WORDS: [&str; 5] = ["exit", "hello", "help", "history", "words"];
    rl.set_completer(|stem, _line| {
        WORDS
            .iter()
            .filter(|w| w.starts_with(stem))
            .map(|w| w.to_string())
            .collect()
    });

    loop {
        match rl.input("relish> ") {
            Ok(line) => match line.as_str() {
                "exit" => break,
                "history" => {
                    for i in 1..=rl.get_current_history_length() {
                        if let Some(item) = rl.get_history_item(i) {
                            println!("{i:4}  {item}");
                        }
                    }
                }
                _ => println!("{line}"),
            },
            Err(Error::Interrupted) => println!("interrupted"),
            Err(Error::Eof) => break,
            Err(e) => {
                eprintln!("relish-demo: {e}");
                break;
            }
        }
    }
}

#[cfg(not(unix))]
fn main() {
    eprintln!("relish-demo needs a unix terminal");
}
