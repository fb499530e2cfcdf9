//! Natural ordering for file names with embedded numbers.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::Chars;

fn take_run<F>(chars: &mut Peekable<Chars<'_>>, keep: F) -> String
where
    F: Fn(char) -> bool,
{
    let mut run = String::new();
    while let Some(&c) = chars.peek() {
        if !keep(c) {
            break;
        }
        run.push(c);
        chars.next();
    }
    run
}

/// Compare two digit runs by numeric value, then by length so that `01`
/// sorts after `1`
fn cmp_digits(a: &str, b: &str) -> Ordering {
    let a_trim = a.trim_start_matches('0');
    let b_trim = b.trim_start_matches('0');
    a_trim
        .len()
        .cmp(&b_trim.len())
        .then_with(|| a_trim.cmp(b_trim))
        .then_with(|| a.len().cmp(&b.len()))
}

/// Order strings so that digit runs compare as numbers:
/// `img2.mrc` < `img10.mrc`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let x_run = take_run(&mut left, |c| c.is_ascii_digit());
                let y_run = take_run(&mut right, |c| c.is_ascii_digit());
                match cmp_digits(&x_run, &y_run) {
                    Ordering::Equal => {}
                    other => return other,
                }
            }
            (Some(x), Some(y)) => {
                match x.cmp(&y) {
                    Ordering::Equal => {}
                    other => return other,
                }
                left.next();
                right.next();
            }
        }
    }
}

/// Row order that sorts `keys` naturally. Missing keys go last; ties keep
/// their input order.
pub fn natural_order(keys: &[Option<String>]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..keys.len()).collect();
    order.sort_by(|&a, &b| match (&keys[a], &keys[b]) {
        (Some(x), Some(y)) => natural_cmp(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    order
}
