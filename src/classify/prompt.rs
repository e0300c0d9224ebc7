pub const SYSTEM_MESSAGE: &str = "Welcome to the News Article Categorization System!

This system helps you categorize news articles based on their content. Please follow the instructions below to classify each article.

1. Choose a category from the list of generic categories ( Crime, Politics, Business, Sports, Entertainment, Health, Science, Technology, Defence, Education, Environment, Society & Culture ) that best describes the article's topic.
2. If the article is related to crime, select one or more of the specialized crime categories. Otherwise, leave the list empty:
\t* Crime: General crimes, law enforcement activities, and court cases
\t* Drug Busts: Arrest or seizure of illicit substances, their transportation, sale, or possession
\t* Violent Crime: Murder, assault, robbery, and other violent offenses
\t* Theft & Property Crime: Theft, burglary, vandalism, and other property-related crimes
\t* Cybercrime: Online crimes, such as hacking, identity theft, phishing, and other digital threats
\t* Human Trafficking: Modern-day slavery, exploitation, and human trafficking
\t* Arson & Fires: Fires caused by arson or other malicious intent
\t* Police Investigations: Ongoing police investigations into specific crimes or cases
\t* Court Cases: Court proceedings, verdicts, and sentencing related to various crimes
\t* Corruption & Organized Crime: Government corruption, organized crime groups, and their activities
\t* Synthetic Drugs: Manufacture, sale, possession, or use of synthetic substances designed to mimic the effects of controlled substances
3. Indicate the chance that the article contains information about a future public gathering (such as a festival or demonstration) with a specific location, a specific date, the type of gathering and its name, using one of the following scales:
\t* 1: The article is unlikely to contain any specific details.
\t* 2: The article may contain some general details or a brief summary.
\t* 3: The article contains more detailed information about an event, such as location and date.
\t* 4: The article provides comprehensive coverage of an event.
4. Indicate whether the article text is blocked by the system, i.e. the text contains security or permission warnings about accessing the text:
\t* true: The article text is blocked by the system.
\t* false: The article text is not blocked by the system.
";

const TITLE_PLACEHOLDER: &str = "[INSERT_ARTICLE_TITLE]";
const TEXT_PLACEHOLDER: &str = "[INSERT_ARTICLE_TEXT]";

const USER_TEMPLATE: &str = r#"Please categorize the news article below:

TITLE: `[INSERT_ARTICLE_TITLE]`,
CONTENT: `[INSERT_ARTICLE_TEXT]`,

Using the following JSON object:

{
  "generic_category": "",
  "crime_categories": [""],
  "event_chance": 1,
  "inaccessible": false,
  "explanation": ""
}

Only return the previous JSON object and no further text. Replace each placeholder with your response.
- `generic_category`: one of the generic categories listed above
- `crime_categories`: a list containing one or more crime categories as needed
- `event_chance`: 1, 2, 3 or 4
- `inaccessible`: only `true` when the text contains security or permission warnings that access to the content is prohibited, otherwise `false`
- `explanation`: the explanation of your response

Example:

TITLE: `Breaking News: Police Investigate Robbery`,
CONTENT: `The police are investigating a robbery that occurred at a local convenience store.`,

Result:

{
  "generic_category": "Crime",
  "crime_categories": ["Violent Crime"],
  "event_chance": 1,
  "inaccessible": false,
  "explanation": "Explain your response here."
}
"#;

pub fn user_message(title: &str, text: &str) -> String {
    // text first; the title slot precedes it, so neither value is re-expanded
    USER_TEMPLATE
        .replacen(TEXT_PLACEHOLDER, text, 1)
        .replacen(TITLE_PLACEHOLDER, title, 1)
}

/// Single-prompt form for completion endpoints without chat roles.
pub fn completion_prompt(title: &str, text: &str) -> String {
    format!(
        "{}\n\nHuman: {}\n\nAssistant:",
        SYSTEM_MESSAGE,
        user_message(title, text)
    )
}
