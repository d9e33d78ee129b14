use calmform::form::FormModel;

#[derive(FormModel)]
struct Tuple(String);

fn main() {
    let tuple = Tuple("a@calm.ui".to_string());
    assert!(!tuple.0.is_empty());
}
