/// Define an error type `Foo` holding a `Box<FooKind>`, and the
/// `FooKind` enum or struct itself with `thiserror::Error` derived on
/// it. `Foo` derefs to `FooKind`, displays like it, and converts from
/// anything `FooKind` converts from, so `#[from]` keeps working. The
/// box keeps `Result<T, Foo>` small.
#[macro_export]
macro_rules! def_boxed_thiserror {
    ($wrappername:ident, pub $keyword:tt $kindname:ident { $($body:tt)* }) => {
        #[derive(thiserror::Error, Debug)]
        pub $keyword $kindname { $($body)* }

        #[derive(Debug)]
        pub struct $wrappername(Box<$kindname>);

        impl $wrappername {
            pub fn kind(&self) -> &$kindname {
                &self.0
            }

            pub fn into_kind(self) -> $kindname {
                *self.0
            }
        }

        impl std::ops::Deref for $wrappername {
            type Target = $kindname;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl<E> From<E> for $wrappername where $kindname: From<E> {
            fn from(err: E) -> Self {
                $wrappername(Box::new($kindname::from(err)))
            }
        }

        impl std::error::Error for $wrappername {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                std::error::Error::source(&*self.0)
            }
        }

        impl std::fmt::Display for $wrappername {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&*self.0, f)
            }
        }
    }
}
