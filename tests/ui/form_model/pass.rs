use calmform::form::{FieldKey, FormModel, Value};

#[derive(Clone, calmform::form::FormModel)]
struct DemoForm {
    email: String,
    subscribe: bool,
}

fn main() {
    assert_eq!(
        DemoForm::field_keys(),
        &[FieldKey::new("email"), FieldKey::new("subscribe")]
    );

    let model = DemoForm {
        email: "a@calm.ui".to_string(),
        subscribe: true,
    };
    let mut values = model.to_values();
    assert_eq!(values.text("email"), Some("a@calm.ui"));

    values.insert(FieldKey::new("email"), Value::text("b@calm.ui"));
    let decoded = DemoForm::from_values(&values).expect("decode demo form");
    assert_eq!(decoded.email, "b@calm.ui");
    assert!(decoded.subscribe);
}
