/// Types that expose a human-readable name for logs and error messages.
pub trait HasName {
    fn name(&self) -> &str;
}

impl<T: HasName + ?Sized> HasName for &T {
    fn name(&self) -> &str {
        (*self).name()
    }
}

impl<T: HasName + ?Sized> HasName for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Joins the names of `items` with `sep`, in iteration order.
pub fn join_names<I>(items: I, sep: &str) -> String
where
    I: IntoIterator,
    I::Item: HasName,
{
    items
        .into_iter()
        .map(|item| item.name().to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(String);
    impl HasName for Named {
        fn name(&self) -> &str {
            &self.0
        }
    }

    #[test]
    fn test_has_name_box() {
        let item: Box<Named> = Box::new(Named("hello".to_string()));
        assert_eq!(item.name(), "hello");
    }

    #[test]
    fn test_join_names_keeps_order() {
        let items = vec![
            Named("charlie".to_string()),
            Named("alice".to_string()),
            Named("bob".to_string()),
        ];
        assert_eq!(join_names(&items, " -> "), "charlie -> alice -> bob");
    }
}
