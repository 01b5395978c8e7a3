//! Sample library schema and data.

use joinery_core::{
    EntityDef, Error, FieldDef, FieldInput, Registry, RelationDef, ScalarType, TableStore,
};
use joinery_proto::Value;
use tracing::info;

/// Authors write books, books may have a publisher, readers review books and
/// books carry tags.
pub fn library_registry() -> Result<Registry, Error> {
    Registry::builder()
        .entity(
            EntityDef::new("Author")
                .with_field(FieldDef::primary_key("id", ScalarType::Int64))
                .with_field(FieldDef::new("name", ScalarType::String)),
        )
        .entity(
            EntityDef::new("Publisher")
                .with_field(FieldDef::primary_key("id", ScalarType::Int64))
                .with_field(FieldDef::new("name", ScalarType::String)),
        )
        .entity(
            EntityDef::new("Book")
                .with_field(FieldDef::primary_key("id", ScalarType::Int64))
                .with_field(FieldDef::new("title", ScalarType::String))
                .with_field(FieldDef::optional("year", ScalarType::Int32))
                .with_relation(
                    RelationDef::foreign_key("author", "Author")
                        .required()
                        .with_related_name("books"),
                )
                .with_relation(
                    RelationDef::foreign_key("publisher", "Publisher").with_related_name("catalog"),
                )
                .with_relation(RelationDef::many_to_many("tags", "Tag")),
        )
        .entity(
            EntityDef::new("Review")
                .with_field(FieldDef::primary_key("id", ScalarType::Int64))
                .with_field(FieldDef::new("stars", ScalarType::Int32))
                .with_field(FieldDef::new("reader", ScalarType::String))
                .with_relation(
                    RelationDef::foreign_key("book", "Book")
                        .required()
                        .with_related_name("reviews"),
                ),
        )
        .entity(
            EntityDef::new("Tag")
                .with_field(FieldDef::primary_key("id", ScalarType::Int64))
                .with_field(FieldDef::new("label", ScalarType::String)),
        )
        .build()
}

const BOOKS: &[(&str, i32, usize, Option<usize>, &[usize])] = &[
    ("A Wizard of Earthsea", 1968, 0, Some(0), &[0, 1]),
    ("The Left Hand of Darkness", 1969, 0, Some(0), &[1]),
    ("The Dispossessed", 1974, 0, None, &[1, 2]),
    ("Kindred", 1979, 1, Some(1), &[2]),
    ("Parable of the Sower", 1993, 1, Some(1), &[1, 2]),
    ("Piranesi", 2020, 2, None, &[0]),
];

const REVIEWS: &[(usize, i32, &str)] = &[
    (0, 5, "ann"),
    (0, 4, "bob"),
    (2, 5, "ann"),
    (3, 5, "cy"),
    (3, 3, "bob"),
    (3, 4, "dee"),
    (5, 4, "cy"),
];

/// Insert the sample data unless the store already holds books.
///
/// Returns the number of rows inserted.
pub fn seed<S: TableStore + ?Sized>(store: &S, registry: &Registry) -> Result<usize, Error> {
    let books_table = registry.get_entity("Book")?.table_name();
    if !store.scan(&books_table)?.is_empty() {
        info!("sample data already present");
        return Ok(0);
    }

    let mut inserted = 0;
    let mut save = |entity: &str, values: Vec<(&str, Value)>| -> Result<Value, Error> {
        let values = values
            .into_iter()
            .map(|(name, value)| (name.to_string(), FieldInput::value(value)))
            .collect();
        inserted += 1;
        store.save(registry, entity, values)
    };

    let authors = ["Ursula K. Le Guin", "Octavia E. Butler", "Susanna Clarke"]
        .into_iter()
        .map(|name| save("Author", vec![("name", name.into())]))
        .collect::<Result<Vec<_>, _>>()?;
    let publishers = ["Parnassus", "Doubleday"]
        .into_iter()
        .map(|name| save("Publisher", vec![("name", name.into())]))
        .collect::<Result<Vec<_>, _>>()?;
    let tags = ["fantasy", "classic", "science-fiction"]
        .into_iter()
        .map(|label| save("Tag", vec![("label", label.into())]))
        .collect::<Result<Vec<_>, _>>()?;

    let mut books = Vec::with_capacity(BOOKS.len());
    for (title, year, author, publisher, book_tags) in BOOKS {
        let publisher = publisher.map_or(Value::Null, |p| publishers[p].clone());
        let book = save(
            "Book",
            vec![
                ("title", (*title).into()),
                ("year", Value::Int32(*year)),
                ("author", authors[*author].clone()),
                ("publisher", publisher),
            ],
        )?;
        for tag in *book_tags {
            save(
                "BookTag",
                vec![("book", book.clone()), ("tag", tags[*tag].clone())],
            )?;
        }
        books.push(book);
    }

    for (book, stars, reader) in REVIEWS {
        save(
            "Review",
            vec![
                ("stars", Value::Int32(*stars)),
                ("reader", (*reader).into()),
                ("book", books[*book].clone()),
            ],
        )?;
    }

    info!(rows = inserted, "seeded sample data");
    Ok(inserted)
}
