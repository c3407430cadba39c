/// Selects the part of a store's state that a tracker snapshots.
use std::rc::Rc;

use serde_json::Value;

/// Read and write access to one part of a state value.
///
/// Undo and redo write only the projected part back, leaving the rest of
/// the state as it is.
pub struct Projection<S, P> {
    read: Rc<dyn Fn(&S) -> P>,
    write: Rc<dyn Fn(&mut S, P)>,
    label: String,
}

impl<S, P> Clone for Projection<S, P> {
    fn clone(&self) -> Self {
        Self {
            read: Rc::clone(&self.read),
            write: Rc::clone(&self.write),
            label: self.label.clone(),
        }
    }
}

impl<S, P> std::fmt::Debug for Projection<S, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Projection")
            .field("label", &self.label)
            .finish()
    }
}

impl<S, P> Projection<S, P> {
    pub fn new(
        label: impl Into<String>,
        read: impl Fn(&S) -> P + 'static,
        write: impl Fn(&mut S, P) + 'static,
    ) -> Self {
        Self {
            read: Rc::new(read),
            write: Rc::new(write),
            label: label.into(),
        }
    }

    /// Name shown in log output.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn read(&self, state: &S) -> P {
        (self.read)(state)
    }

    pub fn write(&self, state: &mut S, part: P) {
        (self.write)(state, part)
    }
}

impl<S: Clone + 'static> Projection<S, S> {
    /// The entire state.
    pub fn whole() -> Self {
        Self::new("*", S::clone, |state: &mut S, value| *state = value)
    }
}

impl Projection<Value, Value> {
    /// One member of a JSON object state.
    ///
    /// A missing member reads as `null`. Writing into a `null` state turns
    /// it into an object; writing into any other non-object is skipped.
    pub fn property(name: impl Into<String>) -> Self {
        let name: String = name.into();
        let key = name.clone();
        Self::new(
            name.clone(),
            move |state: &Value| state.get(&key).cloned().unwrap_or(Value::Null),
            move |state: &mut Value, value| match state {
                Value::Object(map) => {
                    map.insert(name.clone(), value);
                }
                Value::Null => {
                    let mut map = serde_json::Map::new();
                    map.insert(name.clone(), value);
                    *state = Value::Object(map);
                }
                other => {
                    tracing::warn!(
                        property = %name,
                        "cannot patch property into non-object state: {other}"
                    );
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_whole_reads_and_replaces() {
        let projection = Projection::<Vec<i32>, Vec<i32>>::whole();
        let mut state = vec![1, 2];
        assert_eq!(projection.read(&state), vec![1, 2]);
        projection.write(&mut state, vec![3]);
        assert_eq!(state, vec![3]);
    }

    #[test]
    fn test_property_patches_only_its_member() {
        let projection = Projection::property("filter");
        let mut state = json!({"filter": "all", "items": [1, 2]});

        assert_eq!(projection.read(&state), json!("all"));
        projection.write(&mut state, json!("done"));

        assert_eq!(state, json!({"filter": "done", "items": [1, 2]}));
        assert_eq!(projection.label(), "filter");
    }

    #[test]
    fn test_property_missing_reads_null() {
        let projection = Projection::property("filter");
        assert_eq!(projection.read(&json!({"items": []})), Value::Null);
    }

    #[test]
    fn test_property_write_into_null_creates_object() {
        let projection = Projection::property("filter");
        let mut state = Value::Null;
        projection.write(&mut state, json!("all"));
        assert_eq!(state, json!({"filter": "all"}));
    }

    #[test]
    fn test_property_write_into_scalar_is_skipped() {
        let projection = Projection::property("filter");
        let mut state = json!(5);
        projection.write(&mut state, json!("all"));
        assert_eq!(state, json!(5));
    }

    #[test]
    fn test_custom_projection() {
        #[derive(Clone)]
        struct Todos {
            filter: String,
            count: u32,
        }
        let projection = Projection::new(
            "filter",
            |t: &Todos| t.filter.clone(),
            |t: &mut Todos, f: String| t.filter = f,
        );
        let mut todos = Todos {
            filter: "all".into(),
            count: 3,
        };
        projection.write(&mut todos, "open".into());
        assert_eq!(todos.filter, "open");
        assert_eq!(todos.count, 3);
    }
}
